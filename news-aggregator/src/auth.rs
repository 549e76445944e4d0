use reqwest::RequestBuilder;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::fetcher::Fetcher;
use crate::source_config::AuthConfig;
use crate::types::Result;

/// Credentials ready to attach to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAuth {
    None,
    Header { name: String, value: String },
    Query { name: String, value: String },
    Bearer(String),
    Basic { username: String, password: Option<String> },
}

impl ResolvedAuth {
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            ResolvedAuth::None => builder,
            ResolvedAuth::Header { name, value } => builder.header(name.as_str(), value.as_str()),
            ResolvedAuth::Query { name, value } => builder.query(&[(name, value)]),
            ResolvedAuth::Bearer(token) => builder.bearer_auth(token),
            ResolvedAuth::Basic { username, password } => {
                builder.basic_auth(username, password.as_ref())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Applies a source's authentication scheme. OAuth2 client-credential tokens
/// are requested once and reused for the collector's lifetime.
pub struct Authenticator {
    config: AuthConfig,
    token: OnceCell<String>,
}

impl Authenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            token: OnceCell::new(),
        }
    }

    pub async fn resolve(&self, fetcher: &Fetcher) -> Result<ResolvedAuth> {
        let resolved = match &self.config {
            AuthConfig::None => ResolvedAuth::None,
            AuthConfig::ApiKey {
                api_key,
                header,
                query_param,
            } => match query_param {
                Some(param) => ResolvedAuth::Query {
                    name: param.clone(),
                    value: api_key.clone(),
                },
                None => ResolvedAuth::Header {
                    name: header.clone(),
                    value: api_key.clone(),
                },
            },
            AuthConfig::Bearer { token } => ResolvedAuth::Bearer(token.clone()),
            AuthConfig::Basic { username, password } => ResolvedAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            AuthConfig::OAuth2 {
                token_url,
                client_id,
                client_secret,
                scope,
            } => {
                let token = self
                    .token
                    .get_or_try_init(|| {
                        request_token(fetcher, token_url, client_id, client_secret, scope.as_deref())
                    })
                    .await?;
                ResolvedAuth::Bearer(token.clone())
            }
        };
        Ok(resolved)
    }
}

async fn request_token(
    fetcher: &Fetcher,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    scope: Option<&str>,
) -> Result<String> {
    debug!("Requesting OAuth2 token from {}", token_url);
    let mut form = vec![
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    if let Some(scope) = scope {
        form.push(("scope", scope));
    }

    let response: TokenResponse = fetcher
        .execute_json(token_url, |client| client.post(token_url).form(&form))
        .await?;
    info!(
        "Obtained OAuth2 token from {} (expires in {:?}s)",
        token_url, response.expires_in
    );
    Ok(response.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_config::RateLimitConfig;
    use crate::types::FetchConfig;

    fn fetcher() -> Fetcher {
        Fetcher::new(FetchConfig::default(), &RateLimitConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn api_key_goes_to_header_or_query() {
        let fetcher = fetcher();
        let header = Authenticator::new(AuthConfig::ApiKey {
            api_key: "k".to_string(),
            header: "X-API-Key".to_string(),
            query_param: None,
        });
        assert_eq!(
            header.resolve(&fetcher).await.unwrap(),
            ResolvedAuth::Header {
                name: "X-API-Key".to_string(),
                value: "k".to_string()
            }
        );

        let query = Authenticator::new(AuthConfig::ApiKey {
            api_key: "k".to_string(),
            header: "X-API-Key".to_string(),
            query_param: Some("api_key".to_string()),
        });
        let resolved = query.resolve(&fetcher).await.unwrap();
        let request = resolved
            .apply(fetcher.client().get("https://api.example/items"))
            .build()
            .unwrap();
        assert_eq!(request.url().as_str(), "https://api.example/items?api_key=k");
    }

    #[tokio::test]
    async fn bearer_and_basic_set_authorization() {
        let fetcher = fetcher();
        let bearer = Authenticator::new(AuthConfig::Bearer {
            token: "abc".to_string(),
        })
        .resolve(&fetcher)
        .await
        .unwrap();
        let request = bearer
            .apply(fetcher.client().get("https://api.example/"))
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer abc"
        );

        let basic = Authenticator::new(AuthConfig::Basic {
            username: "user".to_string(),
            password: Some("pass".to_string()),
        })
        .resolve(&fetcher)
        .await
        .unwrap();
        let request = basic
            .apply(fetcher.client().get("https://api.example/"))
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Basic dXNlcjpwYXNz"
        );
    }
}
