//! Unit tests for Kubernetes resource builders.
//!
//! Run with: `cargo test resources_test`

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use kube::ResourceExt;

    use crate::config::OperatorConfig;
    use crate::controller::protocol::{HTTP, TCP, UDP};
    use crate::controller::resources::{
        build_daemonset, build_ingress, build_service, owner_reference, selector_string,
    };
    use crate::controller::testing::coastie;

    #[test]
    fn test_daemonset_runs_probe_image_with_fixed_resources() {
        let obj = coastie("nightly", "coastie", &["udp"]);
        let config = OperatorConfig {
            image_registry: "registry.local/probes".to_string(),
            ..Default::default()
        };

        let ds = build_daemonset(&obj, &UDP, &config);

        assert_eq!(ds.name_any(), "nightly-udp");
        assert_eq!(ds.namespace().as_deref(), Some("coastie"));
        let spec = ds.spec.unwrap();
        assert_eq!(
            spec.selector.match_labels.unwrap().get("app").map(String::as_str),
            Some("nightly-udp")
        );

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers.len(), 1);
        let container = &pod.containers[0];
        assert_eq!(container.name, "nightly-udp");
        assert_eq!(
            container.image.as_deref(),
            Some("registry.local/probes/udpserver")
        );
        let port = &container.ports.as_ref().unwrap()[0];
        assert_eq!(port.container_port, 8082);
        assert_eq!(port.protocol.as_deref(), Some("UDP"));

        let resources = container.resources.as_ref().unwrap();
        assert_eq!(resources.requests, resources.limits);
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(limits["cpu"].0, "100m");
        assert_eq!(limits["memory"].0, "100M");
    }

    #[test]
    fn test_pod_template_carries_selector_label() {
        let obj = coastie("nightly", "coastie", &["tcp"]);
        let ds = build_daemonset(&obj, &TCP, &OperatorConfig::default());

        let labels = ds.spec.unwrap().template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels["app"], "nightly-tcp");
        assert_eq!(labels["app.kubernetes.io/component"], "tcp");
        assert_eq!(labels["app.kubernetes.io/managed-by"], "coastie-operator");
        assert_eq!(selector_string("nightly-tcp"), "app=nightly-tcp");
    }

    #[test]
    fn test_service_maps_http_port_80_to_container_8080() {
        let obj = coastie("nightly", "coastie", &["http"]);
        let svc = build_service(&obj, &HTTP);

        let port = &svc.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
        assert_eq!(port.protocol.as_deref(), Some("TCP"));
    }

    #[test]
    fn test_ingress_routes_host_to_service() {
        let obj = coastie("nightly", "coastie", &["http"]);
        let ingress = build_ingress(&obj, &HTTP);

        let rule = &ingress.spec.unwrap().rules.unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("coastie.example.com"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/"));
        assert_eq!(path.path_type, "Prefix");
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "nightly-http");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(80));
    }

    #[test]
    fn test_every_object_is_owned_by_the_coastie() {
        let obj = coastie("nightly", "coastie", &["http"]);
        let expected = owner_reference(&obj);
        assert_eq!(expected.kind, "Coastie");
        assert_eq!(expected.uid, "uid-nightly");
        assert_eq!(expected.controller, Some(true));

        let refs = [
            build_daemonset(&obj, &HTTP, &OperatorConfig::default()).owner_references().to_vec(),
            build_service(&obj, &HTTP).owner_references().to_vec(),
            build_ingress(&obj, &HTTP).owner_references().to_vec(),
        ];
        for owners in refs {
            assert_eq!(owners, vec![expected.clone()]);
        }
    }
}
