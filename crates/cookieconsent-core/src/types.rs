//! Core types for Cookieconsent

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregate accept/reject counts. Backed by a single logical row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentTotals {
    pub accepted: u64,
    pub rejected: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Stable row token; `None` when no row has been written yet.
    pub record_id: Option<String>,
}

impl ConsentTotals {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn responses(&self) -> u64 {
        self.accepted.saturating_add(self.rejected)
    }

    /// Share of responses that accepted, or `None` before any response.
    pub fn acceptance_rate(&self) -> Option<f64> {
        match self.responses() {
            0 => None,
            n => Some(self.accepted as f64 / n as f64),
        }
    }
}

/// Cookie category shown as a group in the preferences panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookieCategory {
    Required,
    Functional,
    Analytics,
    Performance,
    Advertising,
    Security,
    Other,
}

impl CookieCategory {
    pub const ALL: [CookieCategory; 7] = [
        CookieCategory::Required,
        CookieCategory::Functional,
        CookieCategory::Analytics,
        CookieCategory::Performance,
        CookieCategory::Advertising,
        CookieCategory::Security,
        CookieCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CookieCategory::Required => "required",
            CookieCategory::Functional => "functional",
            CookieCategory::Analytics => "analytics",
            CookieCategory::Performance => "performance",
            CookieCategory::Advertising => "advertising",
            CookieCategory::Security => "security",
            CookieCategory::Other => "other",
        }
    }
}

impl fmt::Display for CookieCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CookieCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        CookieCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| Error::validation("category", format!("unknown category '{}'", s)))
    }
}

/// A declared cookie, as stored in the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieDeclaration {
    pub id: i64,
    pub category: CookieCategory,
    pub cookie_id: String,
    pub domain: String,
    pub duration: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub uid: String,
}

/// Raw registry input as submitted by an administrator. Every field is
/// optional here so that a missing field surfaces as a validation error
/// naming that field rather than as a decode failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieInput {
    pub category: Option<String>,
    pub cookie_id: Option<String>,
    pub domain: Option<String>,
    pub duration: Option<String>,
    pub description: Option<String>,
}

/// Registry input that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieFields {
    pub category: CookieCategory,
    pub cookie_id: String,
    pub domain: String,
    pub duration: String,
    pub description: String,
}

impl CookieInput {
    pub fn new(
        category: impl Into<String>,
        cookie_id: impl Into<String>,
        domain: impl Into<String>,
        duration: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category: Some(category.into()),
            cookie_id: Some(cookie_id.into()),
            domain: Some(domain.into()),
            duration: Some(duration.into()),
            description: Some(description.into()),
        }
    }

    /// Checks that every field is present and non-blank. Fields are checked
    /// in declaration order and the first failure is reported.
    pub fn validate(&self) -> Result<CookieFields> {
        let category = required("category", &self.category)?.parse::<CookieCategory>()?;
        Ok(CookieFields {
            category,
            cookie_id: required("cookieId", &self.cookie_id)?,
            domain: required("domain", &self.domain)?,
            duration: required("duration", &self.duration)?,
            description: required("description", &self.description)?,
        })
    }
}

fn required(field: &str, value: &Option<String>) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::validation(field, "is required")),
    }
}

/// Banner box style.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerLayout {
    #[default]
    Box,
    Bar,
    Cloud,
}

impl BannerLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            BannerLayout::Box => "box",
            BannerLayout::Bar => "bar",
            BannerLayout::Cloud => "cloud",
        }
    }
}

impl FromStr for BannerLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "box" => Ok(BannerLayout::Box),
            "bar" => Ok(BannerLayout::Bar),
            "cloud" => Ok(BannerLayout::Cloud),
            other => Err(Error::validation("layout", format!("unknown layout '{}'", other))),
        }
    }
}

/// Where the banner appears on the page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BannerPosition {
    #[default]
    BottomLeft,
    BottomCenter,
    BottomRight,
    TopCenter,
    Center,
}

impl BannerPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            BannerPosition::BottomLeft => "bottom-left",
            BannerPosition::BottomCenter => "bottom-center",
            BannerPosition::BottomRight => "bottom-right",
            BannerPosition::TopCenter => "top-center",
            BannerPosition::Center => "center",
        }
    }
}

impl FromStr for BannerPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bottom-left" => Ok(BannerPosition::BottomLeft),
            "bottom-center" => Ok(BannerPosition::BottomCenter),
            "bottom-right" => Ok(BannerPosition::BottomRight),
            "top-center" => Ok(BannerPosition::TopCenter),
            "center" => Ok(BannerPosition::Center),
            other => Err(Error::validation("position", format!("unknown position '{}'", other))),
        }
    }
}

/// Banner text and layout. Backed by a single logical row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannerConfig {
    pub popup_title: String,
    pub popup_description: String,
    pub popup_footer: String,
    pub preferences_title: String,
    pub preferences_description: String,
    pub required_cookies: String,
    pub functional_cookies: String,
    pub analytics_cookies: String,
    pub performance_cookies: String,
    pub advertising_cookies: String,
    pub security_cookies: String,
    pub layout: BannerLayout,
    pub position: BannerPosition,
    pub trigger_icon: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub uid: Option<String>,
}

pub const DEFAULT_POPUP_TITLE: &str = "We value your privacy";

impl Default for BannerConfig {
    fn default() -> Self {
        Self {
            popup_title: DEFAULT_POPUP_TITLE.into(),
            popup_description: "We use cookies to enhance your browsing experience, serve personalised \
                ads or content, and analyse our traffic. By clicking 'Accept', you consent to our use of cookies."
                .into(),
            popup_footer: r#"<a href="/privacy-policy">Privacy Policy</a>"#.into(),
            preferences_title: "Customise Consent Preferences".into(),
            preferences_description: "A cookie is a small text file sent to your browser and stored on your \
                device by a website you visit. Cookies may save information about the pages you visit and the \
                devices you use, which in return can give us more insight about how you use our website so we \
                can improve its usability and deliver more relevant content."
                .into(),
            required_cookies: "Necessary cookies are required to enable the basic features of this site, \
                such as providing secure log-in or adjusting your consent preferences. These cookies do not \
                store any personally identifiable data."
                .into(),
            functional_cookies: "Functional cookies help perform certain functionalities like sharing the \
                content of the website on social media platforms, collecting feedback, and other third-party features."
                .into(),
            analytics_cookies: "Analytical cookies are used to understand how visitors interact with the \
                website. These cookies help provide information on metrics such as the number of visitors, \
                bounce rate, traffic source, etc."
                .into(),
            performance_cookies: "Performance cookies are used to understand and analyse the key performance \
                indexes of the website which helps in delivering a better user experience for the visitors."
                .into(),
            advertising_cookies: "Advertisement cookies are used to provide visitors with customised \
                advertisements based on the pages you visited previously and to analyse the effectiveness of \
                the ad campaigns."
                .into(),
            security_cookies: "Cookies used for security authenticate users, prevent fraud, and protect \
                users as they interact with a service."
                .into(),
            layout: BannerLayout::default(),
            position: BannerPosition::default(),
            trigger_icon: None,
            created_at: None,
            updated_at: None,
            uid: None,
        }
    }
}

impl BannerConfig {
    /// Category description shown next to a group of cookies.
    /// `Other` has no dedicated text.
    pub fn category_description(&self, category: CookieCategory) -> Option<&str> {
        match category {
            CookieCategory::Required => Some(&self.required_cookies),
            CookieCategory::Functional => Some(&self.functional_cookies),
            CookieCategory::Analytics => Some(&self.analytics_cookies),
            CookieCategory::Performance => Some(&self.performance_cookies),
            CookieCategory::Advertising => Some(&self.advertising_cookies),
            CookieCategory::Security => Some(&self.security_cookies),
            CookieCategory::Other => None,
        }
    }
}

/// Partial update for the banner row. `None` leaves a field unchanged;
/// an empty `trigger_icon` clears it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BannerConfigPatch {
    pub popup_title: Option<String>,
    pub popup_description: Option<String>,
    pub popup_footer: Option<String>,
    pub preferences_title: Option<String>,
    pub preferences_description: Option<String>,
    pub required_cookies: Option<String>,
    pub functional_cookies: Option<String>,
    pub analytics_cookies: Option<String>,
    pub performance_cookies: Option<String>,
    pub advertising_cookies: Option<String>,
    pub security_cookies: Option<String>,
    pub layout: Option<BannerLayout>,
    pub position: Option<BannerPosition>,
    pub trigger_icon: Option<String>,
}

impl BannerConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.popup_title.is_none()
            && self.popup_description.is_none()
            && self.popup_footer.is_none()
            && self.preferences_title.is_none()
            && self.preferences_description.is_none()
            && self.required_cookies.is_none()
            && self.functional_cookies.is_none()
            && self.analytics_cookies.is_none()
            && self.performance_cookies.is_none()
            && self.advertising_cookies.is_none()
            && self.security_cookies.is_none()
            && self.layout.is_none()
            && self.position.is_none()
            && self.trigger_icon.is_none()
    }

    pub fn apply(&self, config: &mut BannerConfig) {
        fn set(target: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        set(&mut config.popup_title, &self.popup_title);
        set(&mut config.popup_description, &self.popup_description);
        set(&mut config.popup_footer, &self.popup_footer);
        set(&mut config.preferences_title, &self.preferences_title);
        set(&mut config.preferences_description, &self.preferences_description);
        set(&mut config.required_cookies, &self.required_cookies);
        set(&mut config.functional_cookies, &self.functional_cookies);
        set(&mut config.analytics_cookies, &self.analytics_cookies);
        set(&mut config.performance_cookies, &self.performance_cookies);
        set(&mut config.advertising_cookies, &self.advertising_cookies);
        set(&mut config.security_cookies, &self.security_cookies);
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if let Some(position) = self.position {
            config.position = position;
        }
        if let Some(icon) = &self.trigger_icon {
            let icon = icon.trim();
            config.trigger_icon = (!icon.is_empty()).then(|| icon.to_string());
        }
    }
}
