//! The subscription-gated page shell.
//!
//! The shell always resolves the account affordance, then decides between the idea generator
//! and the pricing view from a single entitlement check.

use std::sync::Arc;

use crate::config::IdeaConfig;
use crate::entitlement::{Account, Entitlements, PricingTier};
use crate::error::Result;

/// Plan that unlocks the generator.
pub const DEFAULT_PLAN: &str = "premium_subscription";

pub const TITLE: &str = "Business Idea Generator";
pub const TITLE_SUBTITLE: &str = "AI-powered innovation at your fingertips";
pub const PRICING_TITLE: &str = "Choose Your Plan";
pub const PRICING_SUBTITLE: &str = "Unlock unlimited AI-powered business ideas";

/// What the page shows below the account affordance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageView {
    /// The account holds the plan; mount the idea stream.
    Generator,
    /// The account lacks the plan; show these tiers.
    Pricing(Vec<PricingTier>),
}

/// The resolved page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPage {
    pub account: Option<Account>,
    pub view: PageView,
}

/// Page shell gating the generator behind a plan.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use ideagen::{Account, Page, PageView, StaticEntitlements};
///
/// # tokio_test::block_on(async {
/// let entitlements = StaticEntitlements::new(
///     Some(Account::new("Ada")),
///     vec!["premium_subscription".to_string()],
/// );
/// let page = Page::new(Arc::new(entitlements));
/// let resolved = page.resolve().await.unwrap();
/// assert_eq!(resolved.view, PageView::Generator);
/// # })
/// ```
pub struct Page {
    entitlements: Arc<dyn Entitlements>,
    plan: String,
    pricing: Vec<PricingTier>,
}

impl Page {
    /// A page gated on [`DEFAULT_PLAN`] with an empty pricing table.
    pub fn new(entitlements: Arc<dyn Entitlements>) -> Self {
        Self {
            entitlements,
            plan: DEFAULT_PLAN.to_string(),
            pricing: Vec::new(),
        }
    }

    /// A page gated on the configured plan, offering the configured tiers.
    pub fn from_config(entitlements: Arc<dyn Entitlements>, config: &IdeaConfig) -> Self {
        Self::new(entitlements)
            .with_plan(config.plan.clone())
            .with_pricing(config.pricing.clone())
    }

    /// Sets the plan that unlocks the generator.
    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    /// Sets the tiers shown to accounts without the plan.
    pub fn with_pricing(mut self, pricing: Vec<PricingTier>) -> Self {
        self.pricing = pricing;
        self
    }

    /// The gating plan.
    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// Resolve the account and the view.
    pub async fn resolve(&self) -> Result<ResolvedPage> {
        let account = self.entitlements.account().await?;
        let entitled = self.entitlements.has_plan(&self.plan).await?;
        tracing::debug!(
            plan = %self.plan,
            signed_in = account.is_some(),
            entitled,
            "resolved page entitlement"
        );
        let view = if entitled {
            PageView::Generator
        } else {
            PageView::Pricing(self.pricing.clone())
        };
        Ok(ResolvedPage { account, view })
    }
}
