//! Per-protocol parameters for the test pipeline
//!
//! Everything that differs between the TCP, UDP and HTTP tests lives in a
//! [`ProtocolDescriptor`]; the provisioner, readiness gate, prober and status
//! recorder are shared.

use crate::crd::Protocol;

/// Transport used by the probe server's container and Service port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    /// Value for `ServicePort.protocol` / `ContainerPort.protocol`
    pub fn as_k8s(&self) -> &'static str {
        match self {
            Transport::Tcp => "TCP",
            Transport::Udp => "UDP",
        }
    }
}

/// What the probe sends and what counts as a good answer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exchange {
    /// Write `request`, read one newline-terminated line, compare with `reply`
    Line {
        request: &'static [u8],
        reply: &'static [u8],
    },
    /// GET `path` on the external host and expect `status`
    HttpGet { path: &'static str, status: u16 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    pub protocol: Protocol,
    pub transport: Transport,
    /// Port the probe server listens on inside the pod
    pub container_port: i32,
    /// Port exposed by the Service
    pub service_port: i32,
    /// Image name under the configured registry
    pub image_name: &'static str,
    /// Service port name
    pub port_name: &'static str,
    pub exchange: Exchange,
    /// HTTP is reached through an Ingress on the external host
    pub uses_ingress: bool,
}

pub const TCP: ProtocolDescriptor = ProtocolDescriptor {
    protocol: Protocol::Tcp,
    transport: Transport::Tcp,
    container_port: 8081,
    service_port: 8081,
    image_name: "tcpserver",
    port_name: "tcpserver",
    exchange: Exchange::Line {
        request: b"Annie, are you ok?\n",
        reply: b"So, Annie are you ok?\n",
    },
    uses_ingress: false,
};

pub const UDP: ProtocolDescriptor = ProtocolDescriptor {
    protocol: Protocol::Udp,
    transport: Transport::Udp,
    container_port: 8082,
    service_port: 8082,
    image_name: "udpserver",
    port_name: "udpserver",
    exchange: Exchange::Line {
        request: b"ruok?\n",
        reply: b"imok\n",
    },
    uses_ingress: false,
};

pub const HTTP: ProtocolDescriptor = ProtocolDescriptor {
    protocol: Protocol::Http,
    transport: Transport::Tcp,
    container_port: 8080,
    service_port: 80,
    image_name: "httpserver",
    port_name: "httpserver",
    exchange: Exchange::HttpGet {
        path: "/ruok",
        status: 200,
    },
    uses_ingress: true,
};

impl ProtocolDescriptor {
    pub fn for_protocol(protocol: Protocol) -> &'static ProtocolDescriptor {
        match protocol {
            Protocol::Tcp => &TCP,
            Protocol::Udp => &UDP,
            Protocol::Http => &HTTP,
        }
    }

    /// Name shared by the DaemonSet, Service and Ingress: `{coastie}-{protocol}`
    pub fn object_name(&self, coastie_name: &str) -> String {
        format!("{}-{}", coastie_name, self.protocol)
    }

    /// Uppercase label used in alert messages
    pub fn display_name(&self) -> String {
        self.protocol.as_str().to_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_lookup_matches_protocol() {
        for protocol in Protocol::ALL {
            assert_eq!(ProtocolDescriptor::for_protocol(protocol).protocol, protocol);
        }
    }

    #[test]
    fn test_wire_contract_constants() {
        assert_eq!(TCP.container_port, 8081);
        assert_eq!(UDP.container_port, 8082);
        assert_eq!(HTTP.container_port, 8080);
        assert_eq!(HTTP.service_port, 80);
        assert_eq!(UDP.transport.as_k8s(), "UDP");
        assert!(HTTP.uses_ingress && !TCP.uses_ingress && !UDP.uses_ingress);
    }

    #[test]
    fn test_object_name() {
        assert_eq!(TCP.object_name("nightly"), "nightly-tcp");
        assert_eq!(HTTP.display_name(), "HTTP");
    }
}
