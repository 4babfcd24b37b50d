//! Built-in referrer classification tables
//!
//! Domain → canonical source name. Matching is by exact host or subdomain
//! (`m.facebook.com` matches `facebook.com`). These are only defaults; the
//! `[attribution.social_domains]` / `[attribution.search_domains]` config
//! sections replace them wholesale when present.

pub const SOCIAL_DOMAINS: &[(&str, &str)] = &[
    ("facebook.com", "facebook"),
    ("fb.com", "facebook"),
    ("fb.me", "facebook"),
    ("instagram.com", "instagram"),
    ("twitter.com", "twitter"),
    ("x.com", "twitter"),
    ("t.co", "twitter"),
    ("linkedin.com", "linkedin"),
    ("lnkd.in", "linkedin"),
    ("tiktok.com", "tiktok"),
    ("youtube.com", "youtube"),
    ("youtu.be", "youtube"),
    ("pinterest.com", "pinterest"),
    ("pin.it", "pinterest"),
    ("reddit.com", "reddit"),
    ("snapchat.com", "snapchat"),
    ("threads.net", "threads"),
    ("whatsapp.com", "whatsapp"),
    ("wa.me", "whatsapp"),
    ("telegram.org", "telegram"),
    ("t.me", "telegram"),
    ("discord.com", "discord"),
    ("tumblr.com", "tumblr"),
];

pub const SEARCH_DOMAINS: &[(&str, &str)] = &[
    ("google.com", "google"),
    ("google.co.uk", "google"),
    ("google.ca", "google"),
    ("google.com.au", "google"),
    ("google.de", "google"),
    ("google.fr", "google"),
    ("google.co.in", "google"),
    ("bing.com", "bing"),
    ("yahoo.com", "yahoo"),
    ("duckduckgo.com", "duckduckgo"),
    ("baidu.com", "baidu"),
    ("yandex.com", "yandex"),
    ("yandex.ru", "yandex"),
    ("ecosia.org", "ecosia"),
    ("search.brave.com", "brave"),
];

/// Host prefixes that carry no attribution meaning
pub const IGNORED_HOST_PREFIXES: &[&str] = &["www.", "m.", "l.", "lm.", "mobile."];
