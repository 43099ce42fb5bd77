use serde::{Deserialize, Serialize};

/// Demographic / psychographic descriptor of a simulated consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Persona {
    pub age: String,
    pub income: String,
    pub location: String,
    pub household: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Persona {
    /// Built-in audience archetypes.
    pub fn preset(name: &str) -> Option<Persona> {
        let (age, income, location, household, values): (&str, &str, &str, &str, &[&str]) = match name {
            "skincare-obsessed" => (
                "25-40",
                "$60,000-$120,000",
                "Urban",
                "Single or couple, no kids",
                &["Ingredient-conscious", "Follows skincare influencers", "Willing to pay for results"],
            ),
            "clean-beauty" => (
                "28-45",
                "$50,000-$100,000",
                "Urban/Suburban",
                "Varies",
                &["Eco-driven", "Reads ingredient labels", "Prefers cruelty-free brands"],
            ),
            "budget-conscious-mom" => (
                "30-50",
                "$40,000-$80,000",
                "Suburban",
                "Married with children",
                &["Value-seeker", "Time-pressed", "Practical purchases"],
            ),
            "minimalist-men" => (
                "25-45",
                "$50,000-$100,000",
                "Urban",
                "Single or couple",
                &["Low-maintenance routine", "Function over brand", "Seeks simplicity"],
            ),
            "gen-z-tiktok" => (
                "18-26",
                "$25,000-$55,000",
                "Urban",
                "Living with family or roommates",
                &["Trend-aware", "Social-media-influenced", "Discovery-driven"],
            ),
            _ => return None,
        };

        Some(Persona {
            age: age.to_string(),
            income: income.to_string(),
            location: location.to_string(),
            household: household.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        })
    }

    pub fn preset_names() -> &'static [&'static str] {
        &[
            "skincare-obsessed",
            "clean-beauty",
            "budget-conscious-mom",
            "minimalist-men",
            "gen-z-tiktok",
        ]
    }
}

/// The product being tested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductConcept {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub claims: Vec<String>,
    #[serde(default)]
    pub positioning: Option<String>,
}

impl ProductConcept {
    pub fn concept_id(&self) -> &str {
        self.id.as_deref().unwrap_or("default")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PurchaseType {
    #[default]
    OneTime,
    Subscription,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub price: f64,
    #[serde(default)]
    pub purchase_type: PurchaseType,
    #[serde(default)]
    pub shipping: Option<String>,
    #[serde(default)]
    pub discount_framing: Option<String>,
}

impl PricePoint {
    pub fn one_time(price: f64) -> Self {
        Self {
            price,
            purchase_type: PurchaseType::OneTime,
            shipping: None,
            discount_framing: None,
        }
    }

    pub fn subscription(price: f64) -> Self {
        Self {
            purchase_type: PurchaseType::Subscription,
            ..Self::one_time(price)
        }
    }

    /// Renders the price the way a shopper reads it, e.g. `$29.99/month`.
    pub fn display_price(&self) -> String {
        match self.purchase_type {
            PurchaseType::OneTime => format!("${}", self.price),
            PurchaseType::Subscription => format!("${}/month", self.price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_resolve() {
        for name in Persona::preset_names() {
            let persona = Persona::preset(name).unwrap();
            assert_eq!(persona.values.len(), 3);
        }
        assert!(Persona::preset("unknown").is_none());
    }

    #[test]
    fn test_price_display() {
        assert_eq!(PricePoint::one_time(30.0).display_price(), "$30");
        assert_eq!(PricePoint::subscription(9.99).display_price(), "$9.99/month");
    }

    #[test]
    fn test_purchase_type_wire_names() {
        let json = serde_json::to_string(&PurchaseType::OneTime).unwrap();
        assert_eq!(json, "\"one-time\"");
        let parsed: PricePoint = serde_json::from_str(r#"{"price": 12.5, "purchase_type": "subscription"}"#).unwrap();
        assert_eq!(parsed.purchase_type, PurchaseType::Subscription);
    }
}
