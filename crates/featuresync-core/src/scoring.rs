//! Model scoring interface
//!
//! The model itself is an external collaborator. The serving path only needs
//! to know which features a model consumes and how to hand them over.

use crate::Result;

/// A trained model that scores one customer at a time
pub trait Scorer: Send + Sync {
    /// Feature names the model consumes, in input order
    fn required_features(&self) -> Vec<String>;

    /// Score one input vector, ordered like `required_features`
    fn predict(&self, features: Vec<f64>) -> Result<f64>;
}
