//! Output transformation applied after tree aggregation.
//!
//! Models persist a [`PostProcessor`] instead of the training objective so
//! prediction needs no knowledge of the source framework. Element-wise
//! transforms apply per output slot; class-axis transforms ([`Softmax`],
//! [`MulticlassOva`], [`IdentityMulticlass`]) apply across the class axis of
//! one target at a time.
//!
//! [`Softmax`]: PostProcessor::Softmax
//! [`MulticlassOva`]: PostProcessor::MulticlassOva
//! [`IdentityMulticlass`]: PostProcessor::IdentityMulticlass

/// Inference-time output transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostProcessor {
    /// No transformation; output = margin.
    #[default]
    Identity,
    /// `sign(x) * x^2`.
    SignedSquare,
    /// Binary hinge: 1 if margin > 0, else 0.
    Hinge,
    /// Logistic sigmoid `1 / (1 + exp(-alpha * x))`.
    Sigmoid,
    /// `exp(x)`; Poisson/gamma/tweedie/survival objectives.
    Exponential,
    /// `2^(-x / ratio_c)`; isolation forest anomaly score.
    ExponentialStandardRatio,
    /// Softplus `ln(1 + exp(x))`.
    LogarithmOnePlusExp,
    /// No transformation, declared over the class axis.
    IdentityMulticlass,
    /// Max-subtracted softmax over the class axis.
    Softmax,
    /// Per-class sigmoid (one-vs-all multiclass).
    MulticlassOva,
}

impl PostProcessor {
    /// Look up a postprocessor by its canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "identity" => Some(Self::Identity),
            "signed_square" => Some(Self::SignedSquare),
            "hinge" => Some(Self::Hinge),
            "sigmoid" => Some(Self::Sigmoid),
            "exponential" => Some(Self::Exponential),
            "exponential_standard_ratio" => Some(Self::ExponentialStandardRatio),
            "logarithm_one_plus_exp" => Some(Self::LogarithmOnePlusExp),
            "identity_multiclass" => Some(Self::IdentityMulticlass),
            "softmax" => Some(Self::Softmax),
            "multiclass_ova" => Some(Self::MulticlassOva),
            _ => None,
        }
    }

    /// Canonical name, as reported by the serializer.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::SignedSquare => "signed_square",
            Self::Hinge => "hinge",
            Self::Sigmoid => "sigmoid",
            Self::Exponential => "exponential",
            Self::ExponentialStandardRatio => "exponential_standard_ratio",
            Self::LogarithmOnePlusExp => "logarithm_one_plus_exp",
            Self::IdentityMulticlass => "identity_multiclass",
            Self::Softmax => "softmax",
            Self::MulticlassOva => "multiclass_ova",
        }
    }

    /// Transform one target's class slab in place.
    ///
    /// `sigmoid_alpha` scales the sigmoid variants; `ratio_c` is the
    /// isolation-forest normalization constant.
    #[inline]
    pub fn apply(&self, row: &mut [f32], sigmoid_alpha: f32, ratio_c: f32) {
        match self {
            Self::Identity | Self::IdentityMulticlass => {}
            Self::SignedSquare => {
                for x in row.iter_mut() {
                    *x = x.signum() * *x * *x;
                }
            }
            Self::Hinge => {
                for x in row.iter_mut() {
                    *x = if *x > 0.0 { 1.0 } else { 0.0 };
                }
            }
            Self::Sigmoid | Self::MulticlassOva => {
                for x in row.iter_mut() {
                    *x = sigmoid(sigmoid_alpha * *x);
                }
            }
            Self::Exponential => {
                for x in row.iter_mut() {
                    *x = x.exp();
                }
            }
            Self::ExponentialStandardRatio => {
                for x in row.iter_mut() {
                    *x = (-*x / ratio_c).exp2();
                }
            }
            Self::LogarithmOnePlusExp => {
                for x in row.iter_mut() {
                    *x = x.exp().ln_1p();
                }
            }
            Self::Softmax => softmax_inplace(row),
        }
    }
}

/// Numerically stable sigmoid; clamps to [-500, 500] before exponentiating.
#[inline]
fn sigmoid(x: f32) -> f32 {
    let clamped = x.clamp(-500.0, 500.0);
    if clamped >= 0.0 {
        1.0 / (1.0 + (-clamped).exp())
    } else {
        let e = clamped.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable softmax in-place; subtracts the max before exp.
#[inline]
fn softmax_inplace(row: &mut [f32]) {
    if row.is_empty() {
        return;
    }

    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    let mut sum = 0.0f32;
    for x in row.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }

    if sum > 0.0 {
        for x in row.iter_mut() {
            *x /= sum;
        }
    }
}
