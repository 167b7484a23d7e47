use reqwest::blocking::{Request, Response};

/// Executes HTTP requests for remote sources.
pub trait HttpClient {
    fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
