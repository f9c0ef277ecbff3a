//! Consensus fair probabilities across reference bookmakers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::devig::{convert, FairPair};
use crate::types::{OutcomeKey, Quote, Side};

/// One reference bookmaker's devigged view of a proposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub bookmaker: String,
    pub fair: FairPair,
    /// Sum of the raw implied probabilities of the pair.
    pub overround: f64,
    /// The priced pair, primary side first.
    pub quotes: (Quote, Quote),
}

impl Contribution {
    pub fn new(fair: FairPair, primary: Quote, secondary: Quote) -> Self {
        Self {
            bookmaker: primary.bookmaker.clone(),
            overround: convert::overround(&[primary.price, secondary.price]),
            fair,
            quotes: (primary, secondary),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionUpdate {
    Added,
    Replaced,
    Unchanged,
}

/// Fair probability for one outcome key: the element-wise mean of the
/// latest fair pair from every reference bookmaker that priced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusEntry {
    key: OutcomeKey,
    primary: Side,
    secondary: Side,
    fair: FairPair,
    /// Contributing bookmakers in first-contribution order.
    books_used: Vec<String>,
    contributions: BTreeMap<String, Contribution>,
}

impl ConsensusEntry {
    pub fn new(key: OutcomeKey, contribution: Contribution) -> Self {
        let primary = contribution.quotes.0.side.clone();
        let secondary = contribution.quotes.1.side.clone();
        let bookmaker = contribution.bookmaker.clone();
        let fair = contribution.fair;

        let mut contributions = BTreeMap::new();
        contributions.insert(bookmaker.clone(), contribution);

        Self {
            key,
            primary,
            secondary,
            fair,
            books_used: vec![bookmaker],
            contributions,
        }
    }

    /// Record a bookmaker's latest pair. A refresh from a bookmaker already
    /// in `books_used` replaces its previous pair rather than adding to it.
    pub fn apply(&mut self, contribution: Contribution) -> ContributionUpdate {
        let bookmaker = contribution.bookmaker.clone();
        let update = match self.contributions.get(&bookmaker) {
            Some(existing) if *existing == contribution => return ContributionUpdate::Unchanged,
            Some(_) => ContributionUpdate::Replaced,
            None => {
                self.books_used.push(bookmaker.clone());
                ContributionUpdate::Added
            }
        };
        self.contributions.insert(bookmaker, contribution);
        self.recompute();
        update
    }

    fn recompute(&mut self) {
        let pairs: Vec<FairPair> = self
            .books_used
            .iter()
            .filter_map(|b| self.contributions.get(b))
            .map(|c| c.fair)
            .collect();
        if let Some(mean) = FairPair::mean(&pairs) {
            self.fair = mean;
        }
    }

    /// Whether a pair on these sides can contribute to this entry.
    pub fn accepts(&self, primary: &Side, secondary: &Side) -> bool {
        self.primary == *primary && self.secondary == *secondary
    }

    /// Fair probability of one side, if it belongs to this entry's pair.
    pub fn probability(&self, side: &Side) -> Option<f64> {
        if *side == self.primary {
            Some(self.fair.first)
        } else if *side == self.secondary {
            Some(self.fair.second)
        } else {
            None
        }
    }

    pub fn key(&self) -> &OutcomeKey {
        &self.key
    }

    pub fn fair(&self) -> FairPair {
        self.fair
    }

    pub fn sides(&self) -> (&Side, &Side) {
        (&self.primary, &self.secondary)
    }

    pub fn books_used(&self) -> &[String] {
        &self.books_used
    }

    pub fn contributions(&self) -> &BTreeMap<String, Contribution> {
        &self.contributions
    }

    /// Raw reference quotes behind this entry.
    pub fn quotes(&self) -> impl Iterator<Item = &Quote> {
        self.contributions
            .values()
            .flat_map(|c| [&c.quotes.0, &c.quotes.1])
    }
}
