//! Per-host request headers and credentials.

use std::collections::HashMap;

use crate::domain::entities::Credential;

/// Global and per-host header and credential policy.
///
/// Per-host entries overlay the global ones for that host; a host without
/// its own entry gets the global policy.
#[derive(Debug, Clone, Default)]
pub struct HostPolicyStore {
    global_headers: HashMap<String, String>,
    host_headers: HashMap<String, HashMap<String, String>>,
    global_credentials: Option<Credential>,
    host_credentials: HashMap<String, Credential>,
}

impl HostPolicyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or removes (`value = None`) a header, globally or for one host.
    ///
    /// Header names are case-insensitive and stored lowercased.
    pub fn set_header(&mut self, name: &str, value: Option<&str>, host: Option<&str>) {
        let name = name.to_ascii_lowercase();
        let headers = match host {
            Some(host) => self
                .host_headers
                .entry(host.to_ascii_lowercase())
                .or_default(),
            None => &mut self.global_headers,
        };
        match value {
            Some(value) => {
                headers.insert(name, value.to_string());
            }
            None => {
                headers.remove(&name);
            }
        }
    }

    /// Replaces the whole header set, globally or for one host.
    pub fn set_headers(&mut self, headers: HashMap<String, String>, host: Option<&str>) {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        match host {
            Some(host) => {
                self.host_headers.insert(host.to_ascii_lowercase(), headers);
            }
            None => self.global_headers = headers,
        }
    }

    /// Effective headers for a host: global headers overlaid with the host's own.
    #[must_use]
    pub fn headers_for_host(&self, host: Option<&str>) -> HashMap<String, String> {
        let mut merged = self.global_headers.clone();
        if let Some(specific) = host.and_then(|h| self.host_headers.get(&h.to_ascii_lowercase())) {
            merged.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    /// Sets or removes (`credential = None`) credentials, globally or for one host.
    pub fn set_credentials(&mut self, credential: Option<Credential>, host: Option<&str>) {
        match (host, credential) {
            (Some(host), Some(credential)) => {
                self.host_credentials
                    .insert(host.to_ascii_lowercase(), credential);
            }
            (Some(host), None) => {
                self.host_credentials.remove(&host.to_ascii_lowercase());
            }
            (None, credential) => self.global_credentials = credential,
        }
    }

    /// Effective credentials for a host: the host's own, else the global ones.
    #[must_use]
    pub fn credentials_for_host(&self, host: Option<&str>) -> Option<&Credential> {
        host.and_then(|h| self.host_credentials.get(&h.to_ascii_lowercase()))
            .or(self.global_credentials.as_ref())
    }
}
