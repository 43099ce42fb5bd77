//! Prompt templates. Every builder is a pure function of its inputs so the
//! same persona, concept and price always produce the same text.

use crate::domain::{Persona, PricePoint, ProductConcept, PurchaseType};

pub const DLR_SYSTEM_PROMPT: &str = r###"You are rating purchase intent on a 1-5 scale.
1 = Definitely would NOT buy
2 = Probably would NOT buy
3 = Might or might not buy
4 = Probably WOULD buy
5 = Definitely WOULD buy

Output ONLY a single digit (1, 2, 3, 4, or 5). No other text."###;

pub const FLR_TEXT_SYSTEM_PROMPT: &str = r###"You are a consumer participating in market research.
You will see a product and price. Express your honest reaction in 2-4 sentences.
Include your key concerns, what appeals to you, and whether you'd likely buy.
Do NOT output numbers, ratings, or Likert labels.
Be natural - respond as a real person would when discussing a purchase decision."###;

pub const FLR_RATING_SYSTEM_PROMPT: &str = r###"You are an expert purchase intent rater.
Given a consumer's response about a product, rate their likelihood to purchase on a 1-5 scale:
1 = Definitely would NOT buy
2 = Probably would NOT buy
3 = Might or might not buy
4 = Probably WOULD buy
5 = Definitely WOULD buy

Output ONLY a single digit (1, 2, 3, 4, or 5). No explanation."###;

pub const SSR_TEXT_SYSTEM_PROMPT: &str = r###"You are a consumer in a market research survey.
You must ROLEPLAY as the person described below.
You will see a product concept and price.
Answer honestly: "How likely are you to purchase this product at this price?"
Reply with 2-4 sentences of natural language.
Do NOT output numbers, ratings, or Likert labels.
Be honest and specific - mention key reasons and concerns."###;

pub const DLR_RETRY_SUFFIX: &str = "\n\nPREVIOUS RESPONSE WAS INVALID. Output ONLY a single digit 1-5:";
pub const FLR_RETRY_SUFFIX: &str = "\n\nPREVIOUS RESPONSE WAS INVALID. Output ONLY 1, 2, 3, 4, or 5:";

/// Joins non-empty lines; absent optional fields leave no blank line.
fn lines(parts: &[String]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n")
}

fn labelled_list(label: &str, items: &[String]) -> String {
    if items.is_empty() {
        String::new()
    } else {
        format!("{}: {}", label, items.join(", "))
    }
}

fn labelled_opt(label: &str, value: Option<&str>) -> String {
    value.map(|v| format!("{}: {}", label, v)).unwrap_or_default()
}

fn purchase_label(price: &PricePoint) -> &'static str {
    match price.purchase_type {
        PurchaseType::Subscription => "Monthly subscription",
        PurchaseType::OneTime => "One-time purchase",
    }
}

pub fn build_dlr_prompt(persona: &Persona, concept: &ProductConcept, price: &PricePoint) -> String {
    let cadence = match price.purchase_type {
        PurchaseType::Subscription => "monthly",
        PurchaseType::OneTime => "one-time",
    };

    lines(&[
        "CONSUMER PROFILE:".to_string(),
        format!("Age: {}", persona.age),
        format!("Income: {}", persona.income),
        format!("Location: {}", persona.location),
        format!("Household: {}", persona.household),
        format!("Values: {}", persona.values.join(", ")),
        "\nPRODUCT:".to_string(),
        format!("{} - {}", concept.name, concept.category),
        concept.description.clone(),
        labelled_list("Features", &concept.features),
        labelled_list("Claims", &concept.claims),
        format!("\nPRICE: ${} ({})", price.price, cadence),
        "\nAs this consumer, rate your purchase intent (1-5):".to_string(),
    ])
}

pub fn build_flr_text_prompt(persona: &Persona, concept: &ProductConcept, price: &PricePoint) -> String {
    lines(&[
        "AS THIS CONSUMER:".to_string(),
        format!("- Age: {}", persona.age),
        format!("- Income: {}", persona.income),
        format!("- Location: {}", persona.location),
        format!("- Household: {}", persona.household),
        format!("- Shopping values: {}", persona.values.join(", ")),
        "\nYOU ARE SHOWN THIS PRODUCT:".to_string(),
        format!("{} ({})", concept.name, concept.category),
        concept.description.clone(),
        labelled_list("Key features", &concept.features),
        labelled_list("Brand claims", &concept.claims),
        format!("\nPRICE: {}", price.display_price()),
        "\nWhat's your honest reaction? Would you consider buying this?".to_string(),
    ])
}

pub fn build_flr_rating_prompt(consumer_response: &str, concept: &ProductConcept, price: &PricePoint) -> String {
    format!(
        r###"PRODUCT: {} at {}

CONSUMER'S RESPONSE:
"{}"

Based on this response, what is this consumer's purchase intent? Rate 1-5:"###,
        concept.name,
        price.display_price(),
        consumer_response.trim()
    )
}

pub fn build_ssr_text_prompt(persona: &Persona, concept: &ProductConcept, price: &PricePoint) -> String {
    lines(&[
        "PERSONA:".to_string(),
        format!("- Age: {}", persona.age),
        format!("- Income: {}", persona.income),
        format!("- Location: {}", persona.location),
        format!("- Household: {}", persona.household),
        format!("- Shopping style: {}", persona.values.join(", ")),
        "\nPRODUCT CONCEPT:".to_string(),
        format!("{} ({})", concept.name, concept.category),
        concept.description.clone(),
        labelled_list("Key features", &concept.features),
        labelled_list("Claims", &concept.claims),
        labelled_opt("Brand positioning", concept.positioning.as_deref()),
        "\nPRICE CONTEXT:".to_string(),
        format!("Price: ${}", price.price),
        format!("Purchase type: {}", purchase_label(price)),
        labelled_opt("Shipping", price.shipping.as_deref()),
        labelled_opt("Discount", price.discount_framing.as_deref()),
        "\nQUESTION:".to_string(),
        "How likely are you to purchase this product at this price?".to_string(),
    ])
}
