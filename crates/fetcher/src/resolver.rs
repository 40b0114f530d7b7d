//! Source resolution: redirect following and hosting-service classification
//!
//! Resolution always succeeds with *some* URL. Probes are metadata-only
//! requests with redirects disabled so redirect chains can be walked without
//! downloading bodies; a single full GET is the first-hop fallback for
//! endpoints that reject HEAD. Any probe failure falls through to the next
//! heavier strategy, and total failure returns the input URL unclassified.

use reqwest::{redirect, Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::config::EngineConfig;
use crate::core::error::Result;

/// Final URL after following redirects, plus the classified hosting service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub url: String,
    pub service: Option<&'static str>,
}

impl ResolvedSource {
    fn unclassified(url: String) -> Self {
        Self { url, service: None }
    }
}

/// Ordered marker table for hosting services that need out-of-band handling
///
/// Evaluated top to bottom; the first substring match wins. This is a closed,
/// finite set, deliberately not a plugin surface.
const SERVICE_MARKERS: &[(&str, &str)] = &[
    ("gofile", "Gofile"),
    ("mega.nz", "Mega"),
    ("mega.co.nz", "Mega"),
    ("mediafire", "MediaFire"),
    ("zippyshare", "ZippyShare"),
    ("1fichier", "1Fichier"),
    ("dlink7", "DLink7"),
    ("clictune", "ClicTune"),
    ("uploaded", "Uploaded"),
    ("turbobit", "Turbobit"),
    ("buzzheavier", "BuzzHeavier"),
    ("pixeldrain", "PixelDrain"),
];

/// Classify a URL against the hosting-service marker table
pub fn classify(url: &str) -> Option<&'static str> {
    let lower = url.to_ascii_lowercase();
    SERVICE_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, name)| *name)
}

/// Follows redirect chains and classifies the final resource's host
pub struct SourceResolver {
    /// Redirects disabled: Location headers are followed manually
    probe: Client,
    /// Ordinary redirect-following client for the GET fallback
    follow: Client,
    max_hops: usize,
}

impl SourceResolver {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let probe = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.probe_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        let follow = Client::builder()
            .redirect(redirect::Policy::limited(5))
            .timeout(config.probe_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self {
            probe,
            follow,
            max_hops: config.max_redirect_hops,
        })
    }

    /// Resolve a URL to its final target and hosting service
    ///
    /// Stops early as soon as the current URL matches a known service
    /// marker, even mid-chain, because those services need out-of-band
    /// handling anyway. Exceeding the hop bound returns the last URL reached.
    pub async fn resolve(&self, url: &str) -> ResolvedSource {
        let mut current = url.to_string();
        let mut hops = 0usize;

        loop {
            if let Some(service) = classify(&current) {
                debug!("service detected at {}: {}", current, service);
                return ResolvedSource {
                    url: current,
                    service: Some(service),
                };
            }
            if hops >= self.max_hops {
                debug!("redirect bound reached at {}", current);
                return ResolvedSource::unclassified(current);
            }

            match self.probe.head(current.as_str()).send().await {
                Ok(response) if response.status().is_redirection() => {
                    match next_location(&current, response.status(), response.headers()) {
                        Some(next) => {
                            hops += 1;
                            debug!("redirect {}: {}", hops, next);
                            current = next;
                        }
                        None => return ResolvedSource::unclassified(current),
                    }
                }
                Ok(response) if response.status().is_success() => {
                    return ResolvedSource {
                        service: classify(&current),
                        url: current,
                    };
                }
                Ok(response) => {
                    // The endpoint rejects metadata-only probing (405 and
                    // friends); one heavier fallback, first hop only.
                    debug!("probe of {} answered {}", current, response.status());
                    if hops == 0 {
                        return self.get_fallback(&current).await;
                    }
                    return ResolvedSource {
                        service: classify(&current),
                        url: current,
                    };
                }
                Err(err) => {
                    debug!("probe of {} failed: {}", current, err);
                    if hops == 0 {
                        return self.get_fallback(&current).await;
                    }
                    return ResolvedSource {
                        service: classify(&current),
                        url: current,
                    };
                }
            }
        }
    }

    /// Heavier first-hop fallback for endpoints that reject HEAD
    async fn get_fallback(&self, url: &str) -> ResolvedSource {
        match self.follow.get(url).send().await {
            Ok(response) => {
                let final_url = response.url().to_string();
                debug!("GET fallback resolved {} -> {}", url, final_url);
                ResolvedSource {
                    service: classify(&final_url),
                    url: final_url,
                }
            }
            Err(err) => {
                debug!("GET fallback for {} failed: {}", url, err);
                ResolvedSource::unclassified(url.to_string())
            }
        }
    }
}

/// Resolve a Location header against the current URL, tolerating relative
/// targets
fn next_location(
    current: &str,
    status: StatusCode,
    headers: &reqwest::header::HeaderMap,
) -> Option<String> {
    debug_assert!(status.is_redirection());
    let location = headers.get(reqwest::header::LOCATION)?.to_str().ok()?;
    if location.starts_with("http://") || location.starts_with("https://") {
        return Some(location.to_string());
    }
    let base = Url::parse(current).ok()?;
    base.join(location).ok().map(|u| u.to_string())
}

/// True when the reference should go straight to the swarm transport
pub fn is_peer_reference(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("magnet:") || lower.contains(".torrent")
}

/// True when the URL strongly suggests a direct archive link
pub fn looks_like_archive(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.ends_with(".zip") || lower.contains(".zip?") || lower.contains(".zip#")
}
