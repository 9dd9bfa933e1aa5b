use crate::error::{KarcherError, Result};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }

    pub fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends one request and hands back status and body; status handling is the caller's job.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = ureq::http::Request::builder()
            .method(request.method.as_str())
            .uri(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = match request.body {
            Some(body) => {
                let built = builder
                    .header("Content-Type", "application/json")
                    .body(body)
                    .map_err(|error| KarcherError::Http(error.to_string()))?;
                self.agent.run(built)
            }
            None => {
                let built = builder
                    .body(())
                    .map_err(|error| KarcherError::Http(error.to_string()))?;
                self.agent.run(built)
            }
        }
        .map_err(|error| KarcherError::Http(error.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .read_to_vec()
            .map_err(|error| KarcherError::Http(error.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    type Route = Box<dyn Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync>;

    /// Answers requests from registered routes and records everything it sees.
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<Vec<Route>>,
        pub requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn route(
            &self,
            handler: impl Fn(&HttpRequest) -> Option<HttpResponse> + Send + Sync + 'static,
        ) {
            self.routes.lock().push(Box::new(handler));
        }

        pub fn json_at(&self, path: &'static str, body: serde_json::Value) {
            self.route(move |request| {
                request.url.contains(path).then(|| HttpResponse {
                    status: 200,
                    body: body.to_string().into_bytes(),
                })
            });
        }

        pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .iter()
                .filter(|request| request.url.contains(path))
                .cloned()
                .collect()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().push(request.clone());
            let routes = self.routes.lock();
            for route in routes.iter() {
                if let Some(response) = route(&request) {
                    return Ok(response);
                }
            }
            Ok(HttpResponse {
                status: 404,
                body: Vec::new(),
            })
        }
    }
}
