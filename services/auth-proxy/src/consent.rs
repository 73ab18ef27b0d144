//! Terminal user consent
//!
//! Logs the authorization URL and waits for the operator to paste the URL
//! the browser was redirected to. An empty line or EOF cancels.

use authenticator::{Error, Result, UserAuthenticator};
use oauth_core::BoxFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

/// Reads callback URLs line by line from `R`.
pub struct ConsoleAuthenticator<R> {
    input: Mutex<R>,
}

impl ConsoleAuthenticator<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> ConsoleAuthenticator<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

impl<R> UserAuthenticator for ConsoleAuthenticator<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn present<'a>(&'a self, url: &'a Url, callback_scheme: &'a str) -> BoxFuture<'a, Result<Url>> {
        Box::pin(async move {
            // One prompt at a time
            let mut input = self.input.lock().await;

            info!(authorization_url = %url, "open this URL to authorize, then paste the redirect URL");
            eprintln!("\nAuthorize at:\n  {url}\nPaste the redirect URL and press enter:");

            let mut line = String::new();
            let read = input
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Consent(format!("reading callback: {e}")))?;

            let line = line.trim();
            if read == 0 || line.is_empty() {
                warn!("authorization cancelled at the prompt");
                return Err(Error::ConsentCancelled);
            }

            let callback =
                Url::parse(line).map_err(|e| Error::Consent(format!("invalid callback URL: {e}")))?;
            if callback.scheme() != callback_scheme {
                return Err(Error::Consent(format!(
                    "callback scheme {} does not match {callback_scheme}",
                    callback.scheme()
                )));
            }
            Ok(callback)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn authorize_url() -> Url {
        Url::parse("https://auth.example.com/authorize?state=s").unwrap()
    }

    #[tokio::test]
    async fn reads_callback_url() {
        let console = ConsoleAuthenticator::new(Cursor::new(
            b"http://127.0.0.1:8080/callback?code=C&state=s\n".to_vec(),
        ));
        let callback = console.present(&authorize_url(), "http").await.unwrap();
        assert_eq!(callback.query(), Some("code=C&state=s"));
    }

    #[tokio::test]
    async fn empty_line_cancels() {
        let console = ConsoleAuthenticator::new(Cursor::new(b"\n".to_vec()));
        let err = console.present(&authorize_url(), "http").await.unwrap_err();
        assert_eq!(err, Error::ConsentCancelled);
    }

    #[tokio::test]
    async fn eof_cancels() {
        let console = ConsoleAuthenticator::new(Cursor::new(Vec::new()));
        let err = console.present(&authorize_url(), "http").await.unwrap_err();
        assert_eq!(err, Error::ConsentCancelled);
    }

    #[tokio::test]
    async fn wrong_scheme_is_rejected() {
        let console = ConsoleAuthenticator::new(Cursor::new(b"https://elsewhere/cb?code=C\n".to_vec()));
        let err = console.present(&authorize_url(), "my").await.unwrap_err();
        assert!(matches!(err, Error::Consent(_)), "got: {err:?}");
    }
}
