//! Plan pricing, coupon discounts, and the public catalog.

use serde::Serialize;

use super::models::{Capability, Plan};

/// Coupon codes eligible for the flat discount, matched case-insensitively.
const COUPON_CODES: [&str; 2] = ["PLANT15", "NEWYEAR"];

/// Flat discount applied by an eligible coupon, in percent.
const COUPON_DISCOUNT_PERCENT: i64 = 15;

/// Applies a coupon to an amount in INR major units.
///
/// Eligible codes apply a flat 15% discount floored to an integer; unknown
/// coupons are silently ignored; they produce no discount and no error.
///
/// # Examples
///
/// ```
/// use leafpro_entitlements::subscription::pricing::apply_coupon;
///
/// assert_eq!(apply_coupon(999, Some("PLANT15")), (849, true));
/// assert_eq!(apply_coupon(999, Some("bogus")), (999, false));
/// assert_eq!(apply_coupon(999, None), (999, false));
/// ```
#[must_use]
pub fn apply_coupon(amount: i64, coupon_code: Option<&str>) -> (i64, bool) {
    let eligible = coupon_code
        .is_some_and(|code| COUPON_CODES.iter().any(|known| known.eq_ignore_ascii_case(code)));
    if eligible {
        (amount * (100 - COUPON_DISCOUNT_PERCENT) / 100, true)
    } else {
        (amount, false)
    }
}

/// Final order amount for a plan selection, with the discount flag.
#[must_use]
pub fn plan_price(plan: Plan, coupon_code: Option<&str>) -> (i64, bool) {
    apply_coupon(plan.price_inr(), coupon_code)
}

/// Catalog entry for one plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanListing {
    /// Plan identifier.
    pub id: Plan,
    /// Display name.
    pub name: &'static str,
    /// Current price in INR major units.
    pub price: i64,
    /// Undiscounted reference price.
    pub original_price: i64,
    /// Billing period label.
    pub period: &'static str,
    /// Savings line, shown for the annual plan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub savings: Option<&'static str>,
    /// Marketing description.
    pub description: &'static str,
}

/// One Pro benefit shown in the catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Benefit {
    /// Display title.
    pub title: &'static str,
    /// Display description.
    pub description: &'static str,
    /// The capability the benefit maps to.
    pub feature_key: Capability,
}

/// The static plan catalog.
#[must_use]
pub fn plan_catalog() -> Vec<PlanListing> {
    vec![
        PlanListing {
            id: Plan::Monthly,
            name: "Monthly Plan",
            price: Plan::Monthly.price_inr(),
            original_price: Plan::Monthly.original_price_inr(),
            period: "month",
            savings: None,
            description: "Full access to all Pro features on a monthly billing cycle",
        },
        PlanListing {
            id: Plan::Annual,
            name: "Annual Plan",
            price: Plan::Annual.price_inr(),
            original_price: Plan::Annual.original_price_inr(),
            period: "year",
            savings: Some("Save ₹5,598 (36%)"),
            description: "Full access to all Pro features at our best value rate",
        },
    ]
}

/// The static benefit list.
#[must_use]
pub fn plan_benefits() -> Vec<Benefit> {
    vec![
        Benefit {
            title: "Unlimited Scans",
            description:
                "Scan unlimited plant images for disease detection with no daily restrictions",
            feature_key: Capability::UnlimitedScans,
        },
        Benefit {
            title: "Advanced Analytics",
            description: "Access detailed analysis reports with treatment recommendations",
            feature_key: Capability::AdvancedAnalytics,
        },
        Benefit {
            title: "Data Export",
            description: "Export your data in multiple formats (CSV, PDF, JSON)",
            feature_key: Capability::DataExport,
        },
        Benefit {
            title: "Historical Data",
            description: "Access historical scans and track progress over time",
            feature_key: Capability::HistoricalData,
        },
        Benefit {
            title: "Premium Support",
            description: "Get prioritized support from our plant health experts",
            feature_key: Capability::PremiumSupport,
        },
        Benefit {
            title: "API Access",
            description: "Integrate our AI directly into your own applications",
            feature_key: Capability::ApiAccess,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coupon_discount_is_floored() {
        // 999 * 0.85 = 849.15 → 849
        assert_eq!(apply_coupon(999, Some("PLANT15")), (849, true));
        // 9990 * 0.85 = 8491.5 → 8491
        assert_eq!(apply_coupon(9990, Some("NEWYEAR")), (8491, true));
    }

    #[test]
    fn test_coupon_is_case_insensitive() {
        assert_eq!(apply_coupon(999, Some("plant15")), (849, true));
        assert_eq!(apply_coupon(999, Some("NewYear")), (849, true));
    }

    #[test]
    fn test_unknown_coupon_silently_ignored() {
        assert_eq!(apply_coupon(999, Some("SPRING20")), (999, false));
        assert_eq!(apply_coupon(999, Some("")), (999, false));
    }

    #[test]
    fn test_plan_price_without_coupon() {
        assert_eq!(plan_price(Plan::Monthly, None), (999, false));
        assert_eq!(plan_price(Plan::Annual, None), (9990, false));
    }

    #[test]
    fn test_catalog_shape() {
        let plans = plan_catalog();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].price, 999);
        assert!(plans[0].savings.is_none());
        assert!(plans[1].savings.is_some());

        let benefits = plan_benefits();
        assert_eq!(benefits.len(), 6);
    }

    #[test]
    fn test_benefit_feature_keys_serialize_camel_case() {
        let json = serde_json::to_string(&plan_benefits()).unwrap();
        assert!(json.contains("\"featureKey\":\"unlimitedScans\""));
        assert!(json.contains("\"featureKey\":\"apiAccess\""));
    }
}
