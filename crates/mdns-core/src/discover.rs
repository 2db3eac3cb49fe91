use crate::model::DiscoveredService;
use anyhow::Result;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::time::Duration;

/// Browse for `service_type` until `timeout` elapses, returning every
/// service that resolved in that window.
pub fn browse_blocking(service_type: &str, timeout: Duration) -> Result<Vec<DiscoveredService>> {
    let daemon = ServiceDaemon::new()?;
    let service_type = if service_type.ends_with('.') {
        service_type.to_string()
    } else {
        format!("{}.", service_type)
    };

    let receiver = daemon.browse(&service_type)?;
    let mut out: Vec<DiscoveredService> = Vec::new();

    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        let wait = timeout.saturating_sub(start.elapsed()).min(Duration::from_millis(500));
        if let Ok(event) = receiver.recv_timeout(wait) {
            match event {
                ServiceEvent::ServiceResolved(info) => {
                    let txt = info
                        .get_properties()
                        .iter()
                        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
                        .collect::<Vec<_>>();

                    let fullname = info.get_fullname().to_string();
                    out.retain(|svc| svc.fullname != fullname);
                    out.push(DiscoveredService {
                        fullname,
                        instance_name: info.get_hostname().to_string(),
                        service_type: service_type.clone(),
                        host_name: info.get_hostname().to_string(),
                        port: info.get_port(),
                        addresses: info.get_addresses().iter().copied().collect(),
                        txt,
                    });
                }
                ServiceEvent::ServiceFound(service_name, full_name) => {
                    tracing::debug!("Found service {} of type {}", full_name, service_name);
                }
                _ => {}
            }
        }
    }

    if let Err(e) = daemon.shutdown() {
        tracing::debug!("mDNS daemon shutdown: {}", e);
    }
    Ok(out)
}
