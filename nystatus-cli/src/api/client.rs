//! Remote fetch collaborators
//!
//! The sync engines only depend on the traits below. [`HttpFetcher`] is the
//! reqwest-backed implementation used by the binary.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::models::{
    FetchFailure, ReportedError, ReportedProduct, parse_errors, parse_portals, parse_products,
};
use crate::config::{EndpointConfig, FetchConfig};
use crate::models::{Instance, Portal, Product};

/// Reads product, portal and error lists from a monitored instance
#[async_trait]
pub trait InstanceFetcher: Send + Sync {
    async fn fetch_products(&self, instance: &Instance) -> Result<Vec<ReportedProduct>, FetchFailure>;

    async fn fetch_portals(&self, instance: &Instance) -> Result<Vec<String>, FetchFailure>;

    async fn fetch_errors(
        &self,
        instance: &Instance,
        portal: &Portal,
    ) -> Result<Vec<ReportedError>, FetchFailure>;
}

/// Reads the raw changelog text of a product
#[async_trait]
pub trait ChangelogSource: Send + Sync {
    async fn fetch_changelog(&self, product: &Product) -> Result<String, FetchFailure>;
}

/// HTTP implementation of both fetch traits
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    endpoints: EndpointConfig,
}

impl HttpFetcher {
    pub fn new(fetch: &FetchConfig, endpoints: &EndpointConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(fetch.timeout_secs))
            .user_agent(&fetch.user_agent)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoints: endpoints.clone(),
        })
    }

    async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, FetchFailure> {
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchFailure::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchFailure::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// `<instance url>/<method>`, tolerating a trailing slash on the instance URL
pub fn method_url(instance_url: &str, method: &str) -> String {
    format!("{}/{}", instance_url.trim_end_matches('/'), method)
}

#[async_trait]
impl InstanceFetcher for HttpFetcher {
    async fn fetch_products(&self, instance: &Instance) -> Result<Vec<ReportedProduct>, FetchFailure> {
        let url = method_url(&instance.url, &self.endpoints.products);
        let body = self
            .get_text(&url, &[("key", instance.private_key.as_str())])
            .await?;
        parse_products(&body)
    }

    async fn fetch_portals(&self, instance: &Instance) -> Result<Vec<String>, FetchFailure> {
        let url = method_url(&instance.url, &self.endpoints.portals);
        let body = self
            .get_text(&url, &[("key", instance.private_key.as_str())])
            .await?;
        parse_portals(&body)
    }

    async fn fetch_errors(
        &self,
        instance: &Instance,
        portal: &Portal,
    ) -> Result<Vec<ReportedError>, FetchFailure> {
        let url = method_url(&instance.url, &self.endpoints.errors);
        let body = self
            .get_text(
                &url,
                &[
                    ("key", instance.private_key.as_str()),
                    ("portal", portal.portal_name.as_str()),
                ],
            )
            .await?;
        parse_errors(&body)
    }
}

#[async_trait]
impl ChangelogSource for HttpFetcher {
    async fn fetch_changelog(&self, product: &Product) -> Result<String, FetchFailure> {
        let url = product
            .changelog_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| FetchFailure::MissingSource(product.name.clone()))?;

        self.get_text(url, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_url() {
        assert_eq!(
            method_url("http://zope.test:8080/", "getProducts"),
            "http://zope.test:8080/getProducts"
        );
        assert_eq!(method_url("http://zope.test", "getPortals"), "http://zope.test/getPortals");
    }

    #[tokio::test]
    async fn test_unreachable_instance_is_transport_failure() {
        let fetcher = HttpFetcher::new(
            &FetchConfig {
                timeout_secs: 2,
                ..FetchConfig::default()
            },
            &EndpointConfig::default(),
        )
        .unwrap();
        let instance = Instance {
            id: 1,
            name: "offline".to_string(),
            url: "http://127.0.0.1:9".to_string(),
            private_key: String::new(),
            revisit: true,
            status: String::new(),
            up_to_date: false,
            no_products: 0,
            date_added: chrono::Utc::now(),
            date_checked: None,
        };

        let result = fetcher.fetch_products(&instance).await;
        assert!(matches!(result, Err(FetchFailure::Transport { .. })));
    }

    #[tokio::test]
    async fn test_changelog_without_url() {
        let fetcher = HttpFetcher::new(&FetchConfig::default(), &EndpointConfig::default()).unwrap();
        let product = Product {
            id: 1,
            name: "naaya-survey".to_string(),
            origin: "n".to_string(),
            latest_found_version: None,
            use_count: 0,
            changelog_url: None,
            notes: String::new(),
        };

        assert_eq!(
            fetcher.fetch_changelog(&product).await,
            Err(FetchFailure::MissingSource("naaya-survey".to_string()))
        );
    }
}
