//! Built-in calibration statements.
//!
//! Each set phrases the five purchase-intent levels differently; averaging
//! across sets dampens wording-specific bias.

use super::LIKERT_POINTS;

pub type AnchorSetText = [&'static str; LIKERT_POINTS];

pub const ANCHOR_SETS: [AnchorSetText; 6] = [
    // direct intent
    [
        "I definitely would not buy this.",
        "I probably would not buy this.",
        "I'm unsure if I'd buy this.",
        "I probably would buy this.",
        "I definitely would buy this.",
    ],
    // interest
    [
        "I have no interest in buying this.",
        "I'm not very interested in buying this.",
        "I might buy it, but I'm undecided.",
        "I'm interested and would likely buy it.",
        "I'm very interested and would buy it.",
    ],
    // value perception
    [
        "This doesn't feel worth purchasing for me.",
        "I'd likely pass on purchasing this.",
        "I could go either way on buying it.",
        "I'd be inclined to purchase it.",
        "I'd be eager to purchase it.",
    ],
    // consideration
    [
        "I wouldn't consider buying this.",
        "I don't think I'd buy this.",
        "I'm on the fence about buying it.",
        "I think I'd buy it.",
        "I'm very likely to buy it.",
    ],
    // avoidance vs approach
    [
        "I would avoid buying this.",
        "I'd usually skip buying something like this.",
        "I'm not sure I'd buy it.",
        "I'd consider buying it.",
        "I'd almost certainly buy it.",
    ],
    // spending intent
    [
        "I wouldn't spend money on this.",
        "I'm unlikely to purchase this.",
        "I'm neutral about purchasing this.",
        "I'm likely to purchase this.",
        "I'm very likely to purchase this.",
    ],
];

/// The first `count` built-in sets (clamped to what is available).
pub fn anchor_sets(count: usize) -> &'static [AnchorSetText] {
    &ANCHOR_SETS[..count.min(ANCHOR_SETS.len())]
}
