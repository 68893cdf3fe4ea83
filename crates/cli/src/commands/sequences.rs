//! Document-sequence maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Show every counter
//! pf-cli sequences show
//!
//! # Raise counters to the highest number already stored
//! pf-cli sequences reseed --kind parts-issue
//! ```
//!
//! Reseeding only ever raises a counter, so it is safe to run against a live
//! database: a concurrent allocation either already moved the counter past
//! the scanned maximum or will continue from it.

use partsflow_core::{DocumentKind, SequenceBook};
use tracing::{info, warn};

use partsflow_server::db::sequences;

/// Log every stored counter.
///
/// # Errors
///
/// Returns an error if the database cannot be read.
pub async fn show(kind: Option<DocumentKind>) -> Result<(), Box<dyn std::error::Error>> {
    let pool = super::connect().await?;
    let counters = sequences::list(&pool, kind).await?;

    if counters.is_empty() {
        info!("No counters stored");
    }
    for counter in counters {
        info!(
            kind = %counter.scope.kind(),
            location = counter.scope.location_code(),
            period = %format!("{}-{:02}", counter.scope.year(), counter.scope.month()),
            last = %counter.scope.number(counter.last_value),
            updated_at = %counter.updated_at,
            "Counter"
        );
    }
    Ok(())
}

/// Raise counters of `kinds` to the highest stored number in each scope.
///
/// # Errors
///
/// Returns an error if the database cannot be read or updated.
pub async fn reseed(kinds: &[DocumentKind]) -> Result<(), Box<dyn std::error::Error>> {
    let pool = super::connect().await?;

    for &kind in kinds {
        let numbers = sequences::existing_numbers(&pool, kind).await?;
        let (book, skipped) = SequenceBook::from_existing(kind, numbers.iter().map(String::as_str));
        for raw in &skipped {
            warn!(%kind, number = %raw, "Skipping unparseable document number");
        }

        let mut tx = pool.begin().await?;
        let mut scopes = 0_usize;
        for (scope, last_value) in book.iter() {
            let stored = sequences::raise_to(&mut tx, scope, last_value).await?;
            if stored > last_value {
                info!(
                    %kind,
                    location = scope.location_code(),
                    scanned = last_value,
                    stored,
                    "Counter already ahead"
                );
            }
            scopes += 1;
        }
        tx.commit().await?;

        info!(%kind, documents = numbers.len(), scopes, skipped = skipped.len(), "Reseeded");
    }
    Ok(())
}
