//! Demo product catalog
//!
//! Two products (a free basic plan and a premium plan billed monthly or
//! yearly) addressed by price lookup keys.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::BillingResult;
use crate::platform::CatalogApi;
use crate::resources::{
    CreatePrice, CreateProduct, CurrencyOption, Price, Product, Recurring, RecurringInterval,
};

pub const BASIC_MONTHLY: &str = "demo_basic_monthly";
pub const PREMIUM_YEARLY: &str = "demo_premium_yearly";
pub const PREMIUM_MONTHLY: &str = "demo_premium_monthly";

pub const DEMO_PRICE_LOOKUP_KEYS: [&str; 3] = [BASIC_MONTHLY, PREMIUM_YEARLY, PREMIUM_MONTHLY];

#[derive(Debug, Clone, Copy)]
pub struct DemoPrice {
    pub lookup_key: &'static str,
    /// AUD cents
    pub unit_amount: i64,
    pub nzd_amount: i64,
    pub usd_amount: i64,
    pub interval: RecurringInterval,
}

impl DemoPrice {
    fn create_params(&self, product_id: &str) -> CreatePrice {
        CreatePrice {
            product: product_id.to_string(),
            lookup_key: self.lookup_key.to_string(),
            unit_amount: self.unit_amount,
            currency: "aud".to_string(),
            currency_options: HashMap::from([
                (
                    "nzd".to_string(),
                    CurrencyOption {
                        unit_amount: self.nzd_amount,
                    },
                ),
                (
                    "usd".to_string(),
                    CurrencyOption {
                        unit_amount: self.usd_amount,
                    },
                ),
            ]),
            recurring: Recurring {
                interval: self.interval,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DemoProduct {
    pub name: &'static str,
    pub description: &'static str,
    pub default_price_lookup_key: &'static str,
    pub prices: &'static [DemoPrice],
}

pub const DEMO_PRODUCTS: [DemoProduct; 2] = [
    DemoProduct {
        name: "Demo Basic",
        description: "Demo Basic (Free) subscription",
        default_price_lookup_key: BASIC_MONTHLY,
        prices: &[DemoPrice {
            lookup_key: BASIC_MONTHLY,
            unit_amount: 0,
            nzd_amount: 0,
            usd_amount: 0,
            interval: RecurringInterval::Month,
        }],
    },
    DemoProduct {
        name: "Demo Premium",
        description: "Demo Premium subscription",
        default_price_lookup_key: PREMIUM_YEARLY,
        prices: &[
            DemoPrice {
                lookup_key: PREMIUM_MONTHLY,
                unit_amount: 1000,
                nzd_amount: 1500,
                usd_amount: 500,
                interval: RecurringInterval::Month,
            },
            DemoPrice {
                lookup_key: PREMIUM_YEARLY,
                unit_amount: 10000,
                nzd_amount: 15000,
                usd_amount: 5000,
                interval: RecurringInterval::Year,
            },
        ],
    },
];

/// Product search query matching any of `names`
pub fn build_search_query(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("name:'{}'", name))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Products and prices of the demo catalog
#[derive(Debug, Clone, Serialize)]
pub struct DemoCatalog {
    pub products: Vec<Product>,
    pub prices: Vec<Price>,
    /// Products created by this call
    pub created: Vec<String>,
}

pub struct CatalogService<P: ?Sized> {
    platform: Arc<P>,
}

impl<P: CatalogApi + ?Sized> CatalogService<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }

    pub async fn fetch_demo_products(&self) -> BillingResult<Vec<Product>> {
        let names: Vec<&str> = DEMO_PRODUCTS.iter().map(|p| p.name).collect();
        self.platform
            .search_products(&build_search_query(&names))
            .await
    }

    /// Demo prices with their product expanded
    pub async fn fetch_demo_prices(&self) -> BillingResult<Vec<Price>> {
        let keys: Vec<String> = DEMO_PRICE_LOOKUP_KEYS.iter().map(|k| k.to_string()).collect();
        self.platform.list_prices_by_lookup_keys(&keys).await
    }

    /// Make sure every demo product exists with its prices and default price.
    ///
    /// Existing products are left untouched; only missing ones are created.
    pub async fn ensure_demo_catalog(&self) -> BillingResult<DemoCatalog> {
        let existing = self.fetch_demo_products().await?;
        let missing: Vec<&DemoProduct> = DEMO_PRODUCTS
            .iter()
            .filter(|demo| !existing.iter().any(|product| product.name == demo.name))
            .collect();

        if missing.is_empty() {
            let names: Vec<&str> = existing.iter().map(|p| p.name.as_str()).collect();
            tracing::info!(products = ?names, "All demo products already exist");
            return Ok(DemoCatalog {
                products: existing,
                prices: self.fetch_demo_prices().await?,
                created: Vec::new(),
            });
        }

        let mut created = Vec::with_capacity(missing.len());
        for demo in missing {
            tracing::info!(product = demo.name, "Creating demo product");
            let product = self
                .platform
                .create_product(CreateProduct {
                    name: demo.name.to_string(),
                    description: demo.description.to_string(),
                })
                .await?;

            for demo_price in demo.prices {
                let price = self
                    .platform
                    .create_price(demo_price.create_params(&product.id))
                    .await?;

                if price.lookup_key.as_deref() == Some(demo.default_price_lookup_key) {
                    self.platform
                        .set_default_price(&product.id, &price.id)
                        .await?;
                }
            }
            created.push(product.id);
        }

        Ok(DemoCatalog {
            products: self.fetch_demo_products().await?,
            prices: self.fetch_demo_prices().await?,
            created,
        })
    }
}
