//! Traffic source attribution
//!
//! Classifies how a visitor arrived (source + medium) once per visit and keeps
//! that first-touch result for the rest of the visit. The session value is
//! owned by the caller (typically serialized into client storage) and threaded
//! back into every recording call; nothing here is global.
//!
//! # Classification order
//!
//! 1. UTM parameters on the landing page (`utm_source` required)
//! 2. Referrer host:
//!    - empty / unparseable → `direct`
//!    - same site → `direct` (internal navigation is not a new acquisition).
//!      The site is the landing page's host, or [`PageVisit::site_host`] when
//!      the landing page is a relative path, plus any configured `site_hosts`.
//!    - known social domain → medium `social`
//!    - known search engine → medium `search`
//!    - anything else → `{source: host, medium: "referral"}`

use crate::config::{AttributionConfig, MAX_SESSION_TTL_MINUTES};
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

pub mod sources;

pub const MEDIUM_DIRECT: &str = "direct";
pub const MEDIUM_SOCIAL: &str = "social";
pub const MEDIUM_SEARCH: &str = "search";
pub const MEDIUM_REFERRAL: &str = "referral";
/// Medium used when `utm_source` is present without `utm_medium`
pub const MEDIUM_CAMPAIGN: &str = "campaign";

/// Where a visit came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSource {
    pub source: String,
    pub medium: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
}

impl TrafficSource {
    pub fn new(source: impl Into<String>, medium: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            medium: medium.into(),
            campaign: None,
        }
    }

    pub fn direct() -> Self {
        Self::new(MEDIUM_DIRECT, MEDIUM_DIRECT)
    }

    pub fn with_campaign(mut self, campaign: impl Into<String>) -> Self {
        self.campaign = Some(campaign.into());
        self
    }
}

/// UTM query parameters captured from the landing page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtmParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UtmParams {
    /// Extract `utm_*` parameters from a URL's query string. Blank values are ignored.
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "utm_source" => &mut params.source,
                "utm_medium" => &mut params.medium,
                "utm_campaign" => &mut params.campaign,
                "utm_term" => &mut params.term,
                "utm_content" => &mut params.content,
                _ => continue,
            };
            // First occurrence wins
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        params
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.medium.is_none()
            && self.campaign.is_none()
            && self.term.is_none()
            && self.content.is_none()
    }

    /// Classification from UTM tags; `None` unless `utm_source` is set
    pub fn traffic_source(&self) -> Option<TrafficSource> {
        let source = self.source.as_deref()?.to_lowercase();
        let medium = self
            .medium
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(|| MEDIUM_CAMPAIGN.to_string());
        Some(TrafficSource {
            source,
            medium,
            campaign: self.campaign.clone(),
        })
    }
}

/// First-touch attribution for one visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAttribution {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_referrer: Option<String>,
    pub traffic_source: TrafficSource,
    #[serde(default)]
    pub utm_params: UtmParams,
    pub landing_page: String,
    /// When the visit started (first touch)
    pub timestamp: DateTime<Utc>,
    /// Last page view seen for the visit; drives the inactivity TTL
    pub last_activity: DateTime<Utc>,
}

impl SessionAttribution {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity > ttl
    }
}

/// One page view as seen by the client
#[derive(Debug, Clone, Copy, Default)]
pub struct PageVisit<'a> {
    /// `document.referrer`-style value; empty or absent means direct
    pub referrer: Option<&'a str>,
    /// Absolute URL or site-relative path (`/jane?utm_source=ig`)
    pub landing_page: &'a str,
    /// Host that served the page (`location.host`). Only consulted when
    /// `landing_page` is relative.
    pub site_host: Option<&'a str>,
}

impl<'a> PageVisit<'a> {
    pub fn new(referrer: Option<&'a str>, landing_page: &'a str) -> Self {
        Self {
            referrer,
            landing_page,
            site_host: None,
        }
    }

    pub fn on_site(mut self, host: &'a str) -> Self {
        self.site_host = Some(host);
        self
    }
}

/// Stateless classifier configured with TTL and domain tables
#[derive(Debug, Clone)]
pub struct TrafficClassifier {
    config: AttributionConfig,
}

impl TrafficClassifier {
    pub fn new(config: AttributionConfig) -> Self {
        Self { config }
    }

    /// Configured TTL, capped at [`MAX_SESSION_TTL_MINUTES`]
    pub fn session_ttl(&self) -> Duration {
        let minutes = self.config.session_ttl_minutes.min(MAX_SESSION_TTL_MINUTES);
        i64::try_from(minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .unwrap_or_else(|| Duration::days(365))
    }

    /// Resolve the attribution for this page view.
    ///
    /// A still-valid `previous` session is reused with its activity refreshed;
    /// otherwise the visit is classified from scratch and a new session starts.
    pub fn attribute(
        &self,
        previous: Option<SessionAttribution>,
        visit: &PageVisit<'_>,
        now: DateTime<Utc>,
    ) -> SessionAttribution {
        if let Some(mut session) = previous {
            if !session.is_expired(now, self.session_ttl()) {
                session.last_activity = now;
                return session;
            }
            tracing::debug!(
                session_id = %session.session_id,
                "Attribution session expired, reclassifying visit"
            );
        }

        let (traffic_source, utm_params) = self.classify(visit);
        SessionAttribution {
            session_id: generate_session_id(now),
            original_referrer: visit
                .referrer
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            traffic_source,
            utm_params,
            landing_page: visit.landing_page.to_string(),
            timestamp: now,
            last_activity: now,
        }
    }

    /// Classify a single visit (UTM first, then referrer)
    pub fn classify(&self, visit: &PageVisit<'_>) -> (TrafficSource, UtmParams) {
        let landing = parse_landing(visit.landing_page);
        let utm = landing
            .as_ref()
            .map(|l| UtmParams::from_url(&l.url))
            .unwrap_or_default();

        if let Some(source) = utm.traffic_source() {
            return (source, utm);
        }

        let landing_host = landing
            .as_ref()
            .and_then(Landing::host)
            .or_else(|| {
                visit
                    .site_host
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(site_host_name)
            });
        (self.classify_referrer(visit.referrer, landing_host.as_deref()), utm)
    }

    /// Classify by referrer host alone
    pub fn classify_referrer(&self, referrer: Option<&str>, landing_host: Option<&str>) -> TrafficSource {
        let Some(referrer) = referrer.map(str::trim).filter(|r| !r.is_empty()) else {
            return TrafficSource::direct();
        };
        let Some(host) = Url::parse(referrer)
            .ok()
            .and_then(|url| url.host_str().map(normalize_host))
        else {
            tracing::trace!(referrer, "Unparseable referrer treated as direct");
            return TrafficSource::direct();
        };

        if self.is_same_site(&host, landing_host) {
            return TrafficSource::direct();
        }
        if let Some(source) = lookup(&self.config.social_domains, &host) {
            return TrafficSource::new(source, MEDIUM_SOCIAL);
        }
        if let Some(source) = lookup(&self.config.search_domains, &host) {
            return TrafficSource::new(source, MEDIUM_SEARCH);
        }
        TrafficSource::new(host, MEDIUM_REFERRAL)
    }

    fn is_same_site(&self, host: &str, landing_host: Option<&str>) -> bool {
        if landing_host.is_some_and(|landing| landing == host) {
            return true;
        }
        self.config
            .site_hosts
            .iter()
            .any(|site| domain_matches(host, &normalize_host(site)))
    }
}

/// Landing page parsed for its query string and (when absolute) its host
struct Landing {
    url: Url,
    absolute: bool,
}

impl Landing {
    fn host(&self) -> Option<String> {
        if !self.absolute {
            return None;
        }
        self.url.host_str().map(normalize_host)
    }
}

/// Parse an absolute URL, or resolve a site-relative path against a placeholder base
fn parse_landing(landing: &str) -> Option<Landing> {
    let landing = landing.trim();
    if landing.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(landing) {
        return Some(Landing { url, absolute: true });
    }
    let base = Url::parse("https://landing.invalid/").ok()?;
    let url = base.join(landing).ok()?;
    Some(Landing {
        url,
        absolute: false,
    })
}

/// `location.host` may carry a port; referrer hosts never do
fn site_host_name(host: &str) -> String {
    let name = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    normalize_host(name)
}

/// Lowercase and strip prefixes like `www.` / `m.`
pub fn normalize_host(host: &str) -> String {
    let mut host = host.trim().trim_end_matches('.').to_lowercase();
    loop {
        match sources::IGNORED_HOST_PREFIXES
            .iter()
            .find(|prefix| host.starts_with(*prefix) && host.len() > prefix.len())
        {
            Some(prefix) => host = host[prefix.len()..].to_string(),
            None => return host,
        }
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|rest| rest.ends_with('.'))
}

fn lookup<'a>(
    table: &'a std::collections::BTreeMap<String, String>,
    host: &str,
) -> Option<&'a str> {
    table
        .iter()
        .find(|(domain, _)| domain_matches(host, domain))
        .map(|(_, source)| source.as_str())
}

/// `sess_<unix millis>_<9 random alphanumerics>`
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("sess_{}_{}", now.timestamp_millis(), suffix.to_lowercase())
}
