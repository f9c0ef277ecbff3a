//! Market aggregation.
//!
//! A `Market` owns every quote seen for one market key during a run, pairs
//! complementary sides from reference bookmakers, and keeps a consensus fair
//! probability per proposition. Markets are mutated only by the aggregation
//! consumer.

pub mod consensus;
pub mod market;

pub use consensus::{ConsensusEntry, Contribution, ContributionUpdate};
pub use market::{BookmakerQuoteTable, Comparison, IngestOutcome, IngestSummary, Market, MarketSnapshot};
