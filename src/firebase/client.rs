use reqwest::{Client, header};
use std::time::Duration;
use thiserror::Error;

pub fn new_client(connect_timeout: Duration) -> Result<Client, FirebaseClientError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

    // Requests that ask for a stream override the accept header
    let client = Client::builder().default_headers(headers).connect_timeout(connect_timeout).build()?;
    Ok(client)
}

#[derive(Error, Debug)]
pub enum FirebaseClientError {
    #[error("request error: {0}")]
    RequestError(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_client_sends_json_accept_header() -> Result<(), FirebaseClientError> {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/")
            .with_status(200)
            .match_header("accept", "application/json")
            .create_async()
            .await;

        let client = new_client(Duration::from_secs(1))?;

        client.get(format!("{}{}", server.url(), "/")).send().await?;

        // Verify that the call came in and that the header is set
        mock.assert_async().await;

        Ok(())
    }
}
