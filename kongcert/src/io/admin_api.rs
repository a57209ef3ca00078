//! Kong admin API adapter.
//!
//! The [`AdminApi`] trait decouples the change invoker from the HTTP
//! transport. [`KongAdminApi`] talks to a real admin endpoint using blocking
//! `ureq`; tests use the in-memory fake from `test_support`.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::types::{Certificate, CertificateData, PluginData, Route, RouteData, ServiceData};

/// Error returned by admin API operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The gateway answered with a status other than the documented success code.
    #[error("unable to {operation}: status code: {status}, error: {body}, request url: {url}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
        url: String,
    },

    #[error("unable to {operation}: request to {url} failed: {message}")]
    Transport {
        operation: &'static str,
        url: String,
        message: String,
    },

    #[error("unable to {operation}: invalid response from {url}: {message}")]
    Decode {
        operation: &'static str,
        url: String,
        message: String,
    },
}

impl ApiError {
    /// HTTP status for [`ApiError::Status`].
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Abstraction over the gateway admin API.
///
/// Each write targets a specific identity, so re-invoking an operation after
/// a partial failure is safe. No operation retries on its own.
pub trait AdminApi {
    fn list_certificates(&self) -> Result<Vec<Certificate>, ApiError>;
    fn list_routes(&self) -> Result<Vec<Route>, ApiError>;

    /// Create (or replace) the certificate with the given id.
    fn create_certificate(&self, id: &str, data: &CertificateData)
    -> Result<Certificate, ApiError>;
    fn update_certificate(&self, id: &str, data: &CertificateData) -> Result<(), ApiError>;
    fn delete_certificate(&self, id: &str) -> Result<(), ApiError>;

    fn create_sni(&self, name: &str, certificate_id: &str) -> Result<(), ApiError>;
    fn update_sni(&self, name: &str, certificate_id: &str) -> Result<(), ApiError>;
    fn delete_sni(&self, name: &str) -> Result<(), ApiError>;

    fn update_route_protocols(&self, route_id: &str, protocols: &[String])
    -> Result<(), ApiError>;

    fn create_or_update_service(&self, id: &str, data: &ServiceData) -> Result<(), ApiError>;
    fn delete_service(&self, id: &str) -> Result<(), ApiError>;
    fn create_or_update_plugin(&self, id: &str, data: &PluginData) -> Result<(), ApiError>;
    fn delete_plugin(&self, id: &str) -> Result<(), ApiError>;
    fn create_or_update_route(&self, id: &str, data: &RouteData) -> Result<(), ApiError>;
    fn delete_route(&self, id: &str) -> Result<(), ApiError>;
}

impl<T: AdminApi + ?Sized> AdminApi for &T {
    fn list_certificates(&self) -> Result<Vec<Certificate>, ApiError> {
        (**self).list_certificates()
    }

    fn list_routes(&self) -> Result<Vec<Route>, ApiError> {
        (**self).list_routes()
    }

    fn create_certificate(
        &self,
        id: &str,
        data: &CertificateData,
    ) -> Result<Certificate, ApiError> {
        (**self).create_certificate(id, data)
    }

    fn update_certificate(&self, id: &str, data: &CertificateData) -> Result<(), ApiError> {
        (**self).update_certificate(id, data)
    }

    fn delete_certificate(&self, id: &str) -> Result<(), ApiError> {
        (**self).delete_certificate(id)
    }

    fn create_sni(&self, name: &str, certificate_id: &str) -> Result<(), ApiError> {
        (**self).create_sni(name, certificate_id)
    }

    fn update_sni(&self, name: &str, certificate_id: &str) -> Result<(), ApiError> {
        (**self).update_sni(name, certificate_id)
    }

    fn delete_sni(&self, name: &str) -> Result<(), ApiError> {
        (**self).delete_sni(name)
    }

    fn update_route_protocols(
        &self,
        route_id: &str,
        protocols: &[String],
    ) -> Result<(), ApiError> {
        (**self).update_route_protocols(route_id, protocols)
    }

    fn create_or_update_service(&self, id: &str, data: &ServiceData) -> Result<(), ApiError> {
        (**self).create_or_update_service(id, data)
    }

    fn delete_service(&self, id: &str) -> Result<(), ApiError> {
        (**self).delete_service(id)
    }

    fn create_or_update_plugin(&self, id: &str, data: &PluginData) -> Result<(), ApiError> {
        (**self).create_or_update_plugin(id, data)
    }

    fn delete_plugin(&self, id: &str) -> Result<(), ApiError> {
        (**self).delete_plugin(id)
    }

    fn create_or_update_route(&self, id: &str, data: &RouteData) -> Result<(), ApiError> {
        (**self).create_or_update_route(id, data)
    }

    fn delete_route(&self, id: &str) -> Result<(), ApiError> {
        (**self).delete_route(id)
    }
}

const OK: &[u16] = &[200];
const CREATED: &[u16] = &[201];
const OK_OR_CREATED: &[u16] = &[200, 201];
const NO_CONTENT: &[u16] = &[204];

/// Admin API client backed by a blocking `ureq` agent.
pub struct KongAdminApi {
    base_url: String,
    agent: ureq::Agent,
}

impl KongAdminApi {
    pub fn new(base_url: &str, connect_timeout: Duration, read_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a paginated collection, following `next` links until exhausted.
    fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        operation: &'static str,
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut next = Some(path.to_string());
        while let Some(page) = next.take() {
            let url = self.url(&page);
            let response = self.send("GET", &page, None, operation, OK)?;
            let body: Page<T> = response.into_json().map_err(|err| ApiError::Decode {
                operation,
                url,
                message: err.to_string(),
            })?;
            items.extend(body.data);
            next = body.next.filter(|n| !n.is_empty());
        }
        Ok(items)
    }

    fn write<B: Serialize>(
        &self,
        method: &str,
        path: &str,
        body: &B,
        operation: &'static str,
        expected: &[u16],
    ) -> Result<ureq::Response, ApiError> {
        let url = self.url(path);
        let value = serde_json::to_value(body).map_err(|err| ApiError::Decode {
            operation,
            url,
            message: err.to_string(),
        })?;
        self.send(method, path, Some(value), operation, expected)
    }

    fn delete(&self, path: &str, operation: &'static str) -> Result<(), ApiError> {
        self.send("DELETE", path, None, operation, NO_CONTENT)?;
        Ok(())
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        operation: &'static str,
        expected: &[u16],
    ) -> Result<ureq::Response, ApiError> {
        let url = self.url(path);
        debug!(method, url = %url, "admin api request");
        let request = self.agent.request(method, &url);
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                return Err(status_error(operation, status, response));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(ApiError::Transport {
                    operation,
                    url,
                    message: transport.to_string(),
                });
            }
        };
        let status = response.status();
        if !expected.contains(&status) {
            return Err(status_error(operation, status, response));
        }
        Ok(response)
    }
}

#[derive(serde::Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

fn status_error(operation: &'static str, status: u16, response: ureq::Response) -> ApiError {
    let url = response.get_url().to_string();
    let body = response.into_string().unwrap_or_default();
    ApiError::Status {
        operation,
        status,
        body,
        url,
    }
}

impl AdminApi for KongAdminApi {
    #[instrument(skip_all)]
    fn list_certificates(&self) -> Result<Vec<Certificate>, ApiError> {
        self.list("/certificates", "list certificates")
    }

    #[instrument(skip_all)]
    fn list_routes(&self) -> Result<Vec<Route>, ApiError> {
        self.list("/routes", "list routes")
    }

    fn create_certificate(
        &self,
        id: &str,
        data: &CertificateData,
    ) -> Result<Certificate, ApiError> {
        let operation = "update or create certificate";
        let path = format!("/certificates/{id}");
        let response = self.write("PUT", &path, data, operation, OK_OR_CREATED)?;
        let url = response.get_url().to_string();
        response.into_json().map_err(|err| ApiError::Decode {
            operation,
            url,
            message: err.to_string(),
        })
    }

    fn update_certificate(&self, id: &str, data: &CertificateData) -> Result<(), ApiError> {
        let path = format!("/certificates/{id}");
        self.write("PATCH", &path, data, "update certificate", OK)?;
        Ok(())
    }

    fn delete_certificate(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/certificates/{id}"), "delete certificate")
    }

    fn create_sni(&self, name: &str, certificate_id: &str) -> Result<(), ApiError> {
        let body = sni_body(name, certificate_id);
        self.write("POST", "/snis", &body, "add sni", CREATED)?;
        Ok(())
    }

    fn update_sni(&self, name: &str, certificate_id: &str) -> Result<(), ApiError> {
        let body = sni_body(name, certificate_id);
        self.write("PATCH", &format!("/snis/{name}"), &body, "update sni", OK)?;
        Ok(())
    }

    fn delete_sni(&self, name: &str) -> Result<(), ApiError> {
        self.delete(&format!("/snis/{name}"), "delete sni")
    }

    fn update_route_protocols(
        &self,
        route_id: &str,
        protocols: &[String],
    ) -> Result<(), ApiError> {
        let body = json!({ "protocols": protocols });
        let path = format!("/routes/{route_id}");
        self.write("PATCH", &path, &body, "update route", OK)?;
        Ok(())
    }

    fn create_or_update_service(&self, id: &str, data: &ServiceData) -> Result<(), ApiError> {
        let path = format!("/services/{id}");
        self.write("PUT", &path, data, "update or create service", OK_OR_CREATED)?;
        Ok(())
    }

    fn delete_service(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/services/{id}"), "delete service")
    }

    fn create_or_update_plugin(&self, id: &str, data: &PluginData) -> Result<(), ApiError> {
        let path = format!("/plugins/{id}");
        self.write("PUT", &path, data, "update or create plugin", OK_OR_CREATED)?;
        Ok(())
    }

    fn delete_plugin(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/plugins/{id}"), "delete plugin")
    }

    fn create_or_update_route(&self, id: &str, data: &RouteData) -> Result<(), ApiError> {
        let path = format!("/routes/{id}");
        self.write("PUT", &path, data, "update or create route", OK_OR_CREATED)?;
        Ok(())
    }

    fn delete_route(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/routes/{id}"), "delete route")
    }
}

fn sni_body(name: &str, certificate_id: &str) -> Value {
    json!({
        "name": name,
        "certificate": { "id": certificate_id },
    })
}
