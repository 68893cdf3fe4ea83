//! Seed master data (service centers, parts catalog, stock) from a YAML file.
//!
//! ```yaml
//! service_centers:
//!   - code: SC001
//!     name: Central Workshop
//! parts:
//!   - part_number: BRK-PAD-01
//!     part_name: Brake pad set
//!     hsn_code: "8708"
//!     unit_price: "1450.00"
//!     on_hand: 40
//! ```
//!
//! Seeding is idempotent: service centers are matched by code and parts by
//! part number.

use std::collections::HashSet;
use std::path::Path;

use partsflow_core::{CatalogPart, DocumentKind, PartId, SequenceScope};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info};

use partsflow_server::db::CatalogRepository;

/// Contents of a seed file.
#[derive(Debug, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub service_centers: Vec<SeedServiceCenter>,
    #[serde(default)]
    pub parts: Vec<SeedPart>,
}

#[derive(Debug, Deserialize)]
pub struct SeedServiceCenter {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedPart {
    pub part_number: String,
    pub part_name: String,
    #[serde(default)]
    pub hsn_code: Option<String>,
    pub unit_price: Decimal,
    /// On-hand quantity; stock is left untouched when absent.
    #[serde(default)]
    pub on_hand: Option<i32>,
}

/// Check a seed file for problems before touching the database.
///
/// Returns one message per problem; an empty list means the file is usable.
#[must_use]
pub fn validate_config(config: &SeedConfig) -> Vec<String> {
    let mut errors = Vec::new();

    let mut codes = HashSet::new();
    for center in &config.service_centers {
        // Any kind works; only the location code is being checked.
        if let Err(e) = SequenceScope::new(DocumentKind::JobCard, &center.code, 2000, 1) {
            errors.push(format!("service center {:?}: {e}", center.code));
        }
        if center.name.trim().is_empty() {
            errors.push(format!("service center {}: name is empty", center.code));
        }
        if !codes.insert(center.code.trim()) {
            errors.push(format!("service center {} is listed twice", center.code));
        }
    }

    let mut numbers = HashSet::new();
    for part in &config.parts {
        if part.part_number.trim().is_empty() {
            errors.push(format!("part {:?}: part number is empty", part.part_name));
        }
        if part.unit_price.is_sign_negative() {
            errors.push(format!("part {}: unit price is negative", part.part_number));
        }
        if part.on_hand.is_some_and(|qty| qty < 0) {
            errors.push(format!("part {}: on-hand quantity is negative", part.part_number));
        }
        if !numbers.insert(part.part_number.trim()) {
            errors.push(format!("part {} is listed twice", part.part_number));
        }
    }

    errors
}

/// Seed master data from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or fails validation, or a
/// database operation fails.
pub async fn master_data(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {file_path}").into());
    }

    info!(path = %file_path, "Loading seed data from file");
    let content = tokio::fs::read_to_string(path).await?;
    let config: SeedConfig = serde_yaml::from_str(&content)?;

    let errors = validate_config(&config);
    if !errors.is_empty() {
        error!("Seed file validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(format!("{} validation errors found", errors.len()).into());
    }

    let pool = super::connect().await?;
    let catalog = CatalogRepository::new(&pool);

    for center in &config.service_centers {
        let stored = catalog
            .upsert_service_center(center.code.trim(), center.name.trim())
            .await?;
        info!(id = %stored.id, code = %stored.code, "Service center seeded");
    }

    for part in &config.parts {
        let stored = catalog
            .upsert_part(&CatalogPart {
                part_id: PartId::new(0),
                part_name: part.part_name.trim().to_string(),
                part_number: Some(part.part_number.trim().to_string()),
                hsn_code: part.hsn_code.clone(),
                unit_price: part.unit_price,
            })
            .await?;
        if let Some(on_hand) = part.on_hand {
            catalog.set_stock(stored.part_id, on_hand).await?;
        }
        info!(
            id = %stored.part_id,
            part_number = %part.part_number,
            on_hand = ?part.on_hand,
            "Part seeded"
        );
    }

    info!(
        service_centers = config.service_centers.len(),
        parts = config.parts.len(),
        "Seeding complete!"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
service_centers:
  - code: SC001
    name: Central Workshop
parts:
  - part_number: BRK-PAD-01
    part_name: Brake pad set
    hsn_code: "8708"
    unit_price: "1450.00"
    on_hand: 40
  - part_number: OIL-FLT-02
    part_name: Oil filter
    unit_price: "320"
"#;

    #[test]
    fn test_parse_sample() {
        let config: SeedConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.service_centers.len(), 1);
        assert_eq!(config.parts.len(), 2);
        assert_eq!(config.parts[0].unit_price, Decimal::new(145_000, 2));
        assert_eq!(config.parts[1].on_hand, None);
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config = SeedConfig {
            service_centers: vec![
                SeedServiceCenter {
                    code: "SC 1".to_string(),
                    name: "Bad code".to_string(),
                },
                SeedServiceCenter {
                    code: "SC2".to_string(),
                    name: " ".to_string(),
                },
            ],
            parts: vec![
                SeedPart {
                    part_number: "P-1".to_string(),
                    part_name: "One".to_string(),
                    hsn_code: None,
                    unit_price: Decimal::new(-1, 0),
                    on_hand: Some(-3),
                },
                SeedPart {
                    part_number: "P-1".to_string(),
                    part_name: "Again".to_string(),
                    hsn_code: None,
                    unit_price: Decimal::ONE,
                    on_hand: None,
                },
            ],
        };

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 5, "{errors:?}");
    }
}
