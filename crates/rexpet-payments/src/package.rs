//! Credit Packages
//!
//! The fixed price list. The UI displays the same three tiers; the webhook
//! learns the credit count from session metadata written from this table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

/// Checkout currency (ISO 4217, lowercase as Stripe expects)
pub const CURRENCY: &str = "eur";

/// Purchasable credit packages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Package {
    Starter,
    Bundle,
    Collection,
}

/// Pricing information
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackagePricing {
    pub id: &'static str,
    pub name: &'static str,
    pub credits: i64,
    pub cents: i64,
}

impl Package {
    pub const ALL: [Package; 3] = [Package::Starter, Package::Bundle, Package::Collection];

    pub fn as_str(&self) -> &'static str {
        match self {
            Package::Starter => "starter",
            Package::Bundle => "bundle",
            Package::Collection => "collection",
        }
    }

    /// Get pricing for this package
    pub fn pricing(&self) -> PackagePricing {
        match self {
            Package::Starter => PackagePricing {
                id: self.as_str(),
                name: "Starter - 2 Credits",
                credits: 2,
                cents: 499, // €4.99
            },
            Package::Bundle => PackagePricing {
                id: self.as_str(),
                name: "Bundle - 10 Credits",
                credits: 10,
                cents: 1499, // €14.99
            },
            Package::Collection => PackagePricing {
                id: self.as_str(),
                name: "Collection - 20 Credits",
                credits: 20,
                cents: 2499, // €24.99
            },
        }
    }

    pub fn credits(&self) -> i64 {
        self.pricing().credits
    }

    /// Largest credit count any single checkout can grant
    pub fn max_credits() -> i64 {
        Self::ALL.iter().map(Package::credits).max().unwrap_or(0)
    }
}

impl FromStr for Package {
    type Err = PaymentError;

    /// Exact match only; the id travels through metadata verbatim
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(Package::Starter),
            "bundle" => Ok(Package::Bundle),
            "collection" => Ok(Package::Collection),
            other => Err(PaymentError::InvalidPackage(other.to_string())),
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
