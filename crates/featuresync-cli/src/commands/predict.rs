//! Score a customer with the saved model and their latest features

use anyhow::{Context, Result};
use featuresync_core::Error;
use featuresync_offline::{ArtifactStore, LinearModel, LocalArtifactStore};
use serde::Serialize;

use super::{open_client, parse_customer_id};
use crate::config::CliConfig;
use crate::output::{print_output, print_success, print_warning, OutputFormat};

#[derive(Debug, Serialize)]
struct Prediction {
    customer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    missing_features: Vec<String>,
}

pub async fn run(config: &CliConfig, customer_id: &str, output_format: &str) -> Result<()> {
    let customer_id = parse_customer_id(customer_id)?;

    let artifacts = LocalArtifactStore::new(&config.model.artifact_root)?;
    let bytes = artifacts
        .get(&config.model.path)
        .await
        .with_context(|| format!("No model at {}; run `featuresync train` first", config.model.path))?;
    let model = LinearModel::from_json(&bytes).context("Saved model is not readable")?;

    let client = open_client(config).await?;

    let prediction = match client.score(&customer_id, &model).await {
        Ok(score) => Prediction {
            customer_id: customer_id.to_string(),
            score: Some(score),
            missing_features: Vec::new(),
        },
        // Never score on made-up inputs; report and skip
        Err(Error::InsufficientFeatures { missing, .. }) => {
            tracing::warn!(customer_id = %customer_id, ?missing, "Skipping prediction");
            Prediction {
                customer_id: customer_id.to_string(),
                score: None,
                missing_features: missing,
            }
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Prediction failed for customer {}", customer_id))
        }
    };

    match OutputFormat::parse(output_format) {
        OutputFormat::Table => match prediction.score {
            Some(score) => print_success(&format!(
                "Customer {}: predicted {} = {:.4}",
                prediction.customer_id, model.target, score
            )),
            None => print_warning(&format!(
                "Customer {}: insufficient features ({}), prediction skipped",
                prediction.customer_id,
                prediction.missing_features.join(", ")
            )),
        },
        _ => {
            print_output(&prediction, output_format)?;
        }
    }

    Ok(())
}
