//! Subscription entitlement and account identity.
//!
//! [`Entitlements`] answers whether the signed-in account holds a plan.  Two implementations are
//! provided: [`StaticEntitlements`], configured up front, and [`ClaimsEntitlements`], which reads
//! the plan claims carried inside the session token itself.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::auth::TokenSource;
use crate::error::{Error, Result};

/// The signed-in account, shown in the account affordance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Display name.
    pub name: String,
    /// Primary email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Account {
    /// Creates an account with just a display name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
        }
    }

    /// Sets the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// One column of the pricing table shown to accounts without the plan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTier {
    /// Plan name.
    pub name: String,
    /// Price as displayed, e.g. `$10/month`.
    pub price: String,
    /// One-line pitch.
    #[serde(default)]
    pub description: String,
    /// Bullet points.
    #[serde(default)]
    pub features: Vec<String>,
}

/// Plan entitlement for the signed-in account.
#[async_trait::async_trait]
pub trait Entitlements: Send + Sync {
    /// Returns true if the account holds `plan`.
    async fn has_plan(&self, plan: &str) -> Result<bool>;

    /// The signed-in account, or `None` when signed out.
    async fn account(&self) -> Result<Option<Account>>;
}

/// Entitlements fixed at construction.
#[derive(Clone, Debug, Default)]
pub struct StaticEntitlements {
    account: Option<Account>,
    plans: Vec<String>,
}

impl StaticEntitlements {
    /// An account holding `plans`.
    pub fn new(account: Option<Account>, plans: Vec<String>) -> Self {
        Self { account, plans }
    }
}

#[async_trait::async_trait]
impl Entitlements for StaticEntitlements {
    async fn has_plan(&self, plan: &str) -> Result<bool> {
        Ok(self.account.is_some() && self.plans.iter().any(|p| p == plan))
    }

    async fn account(&self) -> Result<Option<Account>> {
        Ok(self.account.clone())
    }
}

/// Entitlements read from the session token's JWT claims.
///
/// Plans come from the `pla` claim, a comma-separated list whose entries may carry a `u:`
/// (user) or `o:` (organization) scope prefix.  The account comes from `name` (falling back to
/// `sub`) and `email`.
pub struct ClaimsEntitlements {
    tokens: Arc<dyn TokenSource>,
}

impl ClaimsEntitlements {
    /// Read claims from tokens issued by `tokens`.
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self { tokens }
    }

    async fn claims(&self) -> Result<Option<serde_json::Value>> {
        match self.tokens.token().await? {
            Some(token) => decode_claims(&token).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl Entitlements for ClaimsEntitlements {
    async fn has_plan(&self, plan: &str) -> Result<bool> {
        let Some(claims) = self.claims().await? else {
            return Ok(false);
        };
        Ok(plans_from_claims(&claims).iter().any(|p| p == plan))
    }

    async fn account(&self) -> Result<Option<Account>> {
        let Some(claims) = self.claims().await? else {
            return Ok(None);
        };
        let name = ["name", "sub"]
            .iter()
            .find_map(|key| claims.get(*key).and_then(|v| v.as_str()))
            .unwrap_or("unknown")
            .to_string();
        let email = claims
            .get("email")
            .and_then(|v| v.as_str())
            .map(String::from);
        Ok(Some(Account { name, email }))
    }
}

/// Decode the payload segment of a JWT without verifying its signature.
///
/// The endpoint verifies the token; the claims are only used to decide what to display.
pub fn decode_claims(token: &str) -> Result<serde_json::Value> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => {
            return Err(Error::validation(
                "session token is not a JWT",
                Some("token".to_string()),
            ));
        }
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)?;
    if !claims.is_object() {
        return Err(Error::validation(
            "JWT payload is not an object",
            Some("token".to_string()),
        ));
    }
    Ok(claims)
}

/// Plan names from the `pla` claim with scope prefixes removed.
pub fn plans_from_claims(claims: &serde_json::Value) -> Vec<String> {
    let Some(pla) = claims.get("pla").and_then(|v| v.as_str()) else {
        return Vec::new();
    };
    pla.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.strip_prefix("u:")
                .or_else(|| p.strip_prefix("o:"))
                .unwrap_or(p)
                .to_string()
        })
        .collect()
}
