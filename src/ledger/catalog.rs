//! Product catalog
//!
//! The static table of everything money can buy: role upgrades, timed
//! grants, currency exchanges, and cosmetics. Immutable at runtime;
//! price edits ship as a deploy.

use serde::Serialize;

use crate::auth::Role;
use crate::db::schemas::CurrencyUnit;

/// What a purchased product does to the buyer's account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProductEffect {
    /// Permanently set the account's role
    GrantRole { role: Role },
    /// Credit a currency balance
    GrantCurrency { amount: i64, unit: CurrencyUnit },
    /// Hold a role until the expiry, then revert to the prior role
    TemporaryRole { role: Role, duration_secs: i64 },
    /// Unlock a cosmetic item; no ledger effect beyond the debit
    Cosmetic { item_id: &'static str },
}

/// One purchasable product
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Unique catalog key
    pub name: &'static str,
    /// Price, always positive
    pub cost: i64,
    /// Currency unit the price is denominated in
    pub currency: CurrencyUnit,
    /// Effect applied on purchase
    pub effect: ProductEffect,
    /// Shop blurb
    pub description: &'static str,
}

/// Read-only product lookup
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    products: Vec<Product>,
}

impl ProductCatalog {
    /// The platform's built-in catalog
    pub fn builtin() -> Self {
        use CurrencyUnit::{Claints, Claions};

        Self {
            products: vec![
                Product {
                    name: "StudentRole",
                    cost: 100,
                    currency: Claions,
                    effect: ProductEffect::GrantRole { role: Role::Student },
                    description: "Access student features and content",
                },
                Product {
                    name: "TeacherRole",
                    cost: 500,
                    currency: Claions,
                    effect: ProductEffect::GrantRole { role: Role::Teacher },
                    description: "Create and upload educational content",
                },
                Product {
                    name: "AdminRole",
                    cost: 1000,
                    currency: Claions,
                    effect: ProductEffect::GrantRole { role: Role::Admin },
                    description: "Full administrative privileges",
                },
                Product {
                    name: "DumaxiaPro",
                    cost: 5000,
                    currency: Claions,
                    effect: ProductEffect::GrantRole { role: Role::Admin },
                    description: "Upgrade to Admin role",
                },
                Product {
                    name: "Dumaxium",
                    cost: 100_000,
                    currency: Claions,
                    effect: ProductEffect::GrantRole { role: Role::Owner },
                    description: "Upgrade to Owner role",
                },
                Product {
                    name: "OwnerTimer",
                    cost: 50,
                    currency: Claints,
                    effect: ProductEffect::TemporaryRole {
                        role: Role::Owner,
                        duration_secs: 3600,
                    },
                    description: "Hold the Owner role for one hour",
                },
                Product {
                    name: "ClaionPack",
                    cost: 10,
                    currency: Claints,
                    effect: ProductEffect::GrantCurrency {
                        amount: 1000,
                        unit: Claions,
                    },
                    description: "Exchange Claints for 1,000 Claions",
                },
                Product {
                    name: "PremiumBadge",
                    cost: 500,
                    currency: Claions,
                    effect: ProductEffect::Cosmetic { item_id: "premium_badge" },
                    description: "Stand out with a premium badge on your profile",
                },
                Product {
                    name: "CustomTheme",
                    cost: 750,
                    currency: Claions,
                    effect: ProductEffect::Cosmetic { item_id: "custom_theme" },
                    description: "Unlock exclusive color themes for your profile",
                },
                Product {
                    name: "VideoBoost",
                    cost: 1000,
                    currency: Claions,
                    effect: ProductEffect::Cosmetic { item_id: "video_boost" },
                    description: "Boost your video visibility for 24 hours",
                },
                Product {
                    name: "ChannelBanner",
                    cost: 300,
                    currency: Claions,
                    effect: ProductEffect::Cosmetic { item_id: "channel_banner" },
                    description: "Add a custom banner to your channel",
                },
            ],
        }
    }

    /// Look up a product by its catalog key.
    /// Returns None for unknown names; callers must not default.
    pub fn find(&self, name: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.name == name)
    }

    /// All products, for the shop listing
    pub fn products(&self) -> &[Product] {
        &self.products
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_products() {
        let catalog = ProductCatalog::builtin();

        let pro = catalog.find("DumaxiaPro").unwrap();
        assert_eq!(pro.cost, 5000);
        assert_eq!(pro.currency, CurrencyUnit::Claions);
        assert_eq!(pro.effect, ProductEffect::GrantRole { role: Role::Admin });

        let dumaxium = catalog.find("Dumaxium").unwrap();
        assert_eq!(dumaxium.cost, 100_000);
        assert_eq!(dumaxium.effect, ProductEffect::GrantRole { role: Role::Owner });
    }

    #[test]
    fn test_unknown_product_is_none() {
        let catalog = ProductCatalog::builtin();
        assert!(catalog.find("DoesNotExist").is_none());
        // Lookup is case-sensitive, no fuzzy defaulting
        assert!(catalog.find("dumaxiapro").is_none());
    }

    #[test]
    fn test_names_unique_and_costs_positive() {
        let catalog = ProductCatalog::builtin();
        let mut seen = std::collections::HashSet::new();
        for product in catalog.products() {
            assert!(seen.insert(product.name), "duplicate name {}", product.name);
            assert!(product.cost > 0, "{} has non-positive cost", product.name);
        }
    }

    #[test]
    fn test_timer_priced_in_claints() {
        let catalog = ProductCatalog::builtin();
        let timer = catalog.find("OwnerTimer").unwrap();
        assert_eq!(timer.currency, CurrencyUnit::Claints);
        assert!(matches!(
            timer.effect,
            ProductEffect::TemporaryRole { role: Role::Owner, duration_secs: 3600 }
        ));
    }
}
