use crate::estimator::EstimatorParameters;
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::path::Path;

/// Which refinement phases the adaptive loop carries out.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementToggles {
    /// Spatial refinement driven by the residual estimator.
    pub residual: bool,
    /// Activation of new multi-indices driven by the tail estimator.
    pub tail: bool,
    /// Spatial refinement for oscillations of the coefficient field.
    pub oscillation: bool,
}

impl Default for RefinementToggles {
    fn default() -> Self {
        Self {
            residual: true,
            tail: true,
            oscillation: false,
        }
    }
}

/// Parameters of [`AdaptiveSolver`](crate::adaptive::AdaptiveSolver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Weight of the tail estimate when deciding on spatial refinement.
    pub rho: f64,
    /// Weight of the residual estimate when deciding on spatial refinement.
    pub sigma: f64,
    /// Bulk parameter of the residual marking.
    pub theta_x: f64,
    /// Bulk parameter of the tail marking.
    pub theta_y: f64,
    /// Maximal mesh width for evaluating maximum norms of the coefficients.
    pub maxh: f64,
    /// Search length for new multi-indices beyond the maximal active order.
    pub add_maxm: usize,
    pub quadrature_degree: Option<usize>,
    pub pcg_eps: f64,
    pub pcg_maxiter: usize,
    /// Target accuracy of the overall estimate.
    pub error_eps: f64,
    pub max_refinements: usize,
    pub refinement: RefinementToggles,
    /// Refine every cell instead of bulk marking.
    pub uniform_refinement: bool,
    pub cache_projections: bool,
    /// Keep a copy of the solution of every iteration.
    pub store_solutions: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            rho: 1.0,
            sigma: 1.0,
            theta_x: 0.4,
            theta_y: 0.4,
            maxh: 0.1,
            add_maxm: 20,
            quadrature_degree: None,
            pcg_eps: 1e-6,
            pcg_maxiter: 100,
            error_eps: 1e-2,
            max_refinements: 5,
            refinement: RefinementToggles::default(),
            uniform_refinement: false,
            cache_projections: true,
            store_solutions: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A parameter lies outside its admissible range.
    InvalidParameter {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },
    /// The initial solution has no active multi-indices.
    EmptyIndexSet,
    /// The initial solution does not contain the mean multi-index.
    MissingMeanIndex,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter { name, value, expected } => {
                write!(f, "Invalid value {} for parameter {} (expected {})", value, name, expected)
            }
            Self::EmptyIndexSet => write!(f, "The initial set of active multi-indices is empty"),
            Self::MissingMeanIndex => write!(f, "The mean multi-index is not active in the initial solution"),
        }
    }
}

impl Error for ConfigError {}

fn check(name: &'static str, value: f64, valid: bool, expected: &'static str) -> Result<(), ConfigError> {
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value, expected })
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("rho", self.rho, self.rho > 0.0, "> 0")?;
        check("sigma", self.sigma, self.sigma > 0.0, "> 0")?;
        check("theta_x", self.theta_x, self.theta_x > 0.0 && self.theta_x <= 1.0, "in (0, 1]")?;
        check("theta_y", self.theta_y, self.theta_y > 0.0 && self.theta_y <= 1.0, "in (0, 1]")?;
        check("maxh", self.maxh, self.maxh > 0.0, "> 0")?;
        check("pcg_eps", self.pcg_eps, self.pcg_eps >= 0.0, ">= 0")?;
        check("error_eps", self.error_eps, self.error_eps >= 0.0, ">= 0")?;
        Ok(())
    }

    /// Reads and validates a configuration from a JSON file. Missing fields take their
    /// default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&json).wrap_err_with(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn estimator_parameters(&self) -> EstimatorParameters {
        EstimatorParameters {
            maxh: self.maxh,
            add_maxm: self.add_maxm,
            quadrature_degree: self.quadrature_degree,
        }
    }
}
