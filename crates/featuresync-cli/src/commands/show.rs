//! Show a customer's current features

use anyhow::Result;
use comfy_table::Cell;
use featuresync_core::codec::{format_event_time, format_value};
use serde::Serialize;
use std::collections::BTreeMap;

use super::{open_client, parse_customer_id};
use crate::config::CliConfig;
use crate::output::{
    create_table, format_feature_value, print_output, print_warning, OutputFormat,
};

#[derive(Debug, Serialize)]
struct CustomerFeatures {
    customer_id: String,
    feature_group: String,
    event_time: String,
    features: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    defaulted: Vec<String>,
}

pub async fn run(config: &CliConfig, customer_id: &str, output_format: &str) -> Result<()> {
    let customer_id = parse_customer_id(customer_id)?;
    let client = open_client(config).await?;

    let Some(decoded) = client.get_decoded(&customer_id).await? else {
        print_warning(&format!(
            "No features for customer {} in {}",
            customer_id,
            client.feature_group()
        ));
        return Ok(());
    };

    let mut features = BTreeMap::new();
    for (name, value) in &decoded.values {
        features.insert(name.clone(), format_value(value)?);
    }

    let details = CustomerFeatures {
        customer_id: decoded.customer_id.to_string(),
        feature_group: client.feature_group().to_string(),
        event_time: format_event_time(decoded.event_time),
        features,
        defaulted: decoded.defaulted.clone(),
    };

    match OutputFormat::parse(output_format) {
        OutputFormat::Table => {
            let mut table = create_table();
            table.set_header(vec!["Feature", "Value"]);
            table.add_row(vec!["customer_id", &details.customer_id]);
            table.add_row(vec!["event_time", &details.event_time]);
            for (name, value) in &details.features {
                let defaulted = details.defaulted.iter().any(|d| d == name);
                table.add_row(vec![
                    Cell::new(name),
                    format_feature_value(value, defaulted),
                ]);
            }
            println!("{table}");
        }
        _ => {
            print_output(&details, output_format)?;
        }
    }

    Ok(())
}
