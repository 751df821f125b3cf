//! Random outfit suggestion with dislike avoidance.
//!
//! Each attempt draws one item per slot uniformly and independently, then
//! rejects the draw if it reproduces a disliked combination. The attempt
//! budget is fixed, so a user who has disliked nearly every pairing can get
//! no suggestion even though an acceptable one exists.

use crate::models::{Category, Combination, Item};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

pub const MAX_ATTEMPTS: usize = 10;

/// One user's items split by slot, plus the combinations they disliked.
#[derive(Debug, Default, Clone)]
pub struct Wardrobe {
    pub tops: Vec<Item>,
    pub bottoms: Vec<Item>,
    pub shoes: Vec<Item>,
    pub accessories: Vec<Item>,
    pub dislikes: HashSet<Combination>,
}

impl Wardrobe {
    pub fn from_items<I>(items: I, dislikes: HashSet<Combination>) -> Self
    where
        I: IntoIterator<Item = Item>,
    {
        let mut wardrobe = Wardrobe {
            dislikes,
            ..Default::default()
        };
        for item in items {
            match item.category {
                Category::Top => wardrobe.tops.push(item),
                Category::Bottom => wardrobe.bottoms.push(item),
                Category::Shoes => wardrobe.shoes.push(item),
                Category::Accessory => wardrobe.accessories.push(item),
                Category::Uncategorized => {}
            }
        }
        wardrobe
    }

    pub fn is_disliked(&self, combination: &Combination) -> bool {
        self.dislikes.contains(combination)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SuggestOptions {
    pub include_shoes: bool,
    pub include_accessory: bool,
}

/// Draw a combination that is not disliked, or `None` once the attempt
/// budget is spent.
pub fn suggest<R: Rng + ?Sized>(
    wardrobe: &Wardrobe,
    options: SuggestOptions,
    rng: &mut R,
) -> Option<Combination> {
    for attempt in 1..=MAX_ATTEMPTS {
        let top = pick(&wardrobe.tops, rng);
        let bottom = pick(&wardrobe.bottoms, rng);
        let shoes = if options.include_shoes {
            pick(&wardrobe.shoes, rng)
        } else {
            None
        };
        let accessory = if options.include_accessory {
            pick(&wardrobe.accessories, rng)
        } else {
            None
        };

        let (Some(top), Some(bottom)) = (top, bottom) else {
            tracing::trace!(attempt, "draw missing top or bottom");
            continue;
        };

        let combination = Combination {
            top,
            bottom,
            shoes,
            accessory,
        };
        if !wardrobe.is_disliked(&combination) {
            tracing::debug!(attempt, "suggestion found");
            return Some(combination);
        }
        tracing::trace!(attempt, "draw rejected as disliked");
    }

    tracing::debug!(attempts = MAX_ATTEMPTS, "no suggestion available");
    None
}

fn pick<R: Rng + ?Sized>(items: &[Item], rng: &mut R) -> Option<String> {
    items.choose(rng).map(|item| item.id.clone())
}
