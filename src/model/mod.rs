pub mod encoders;
pub mod expander;
pub mod loss;
pub mod vicreg;

pub use encoders::ConvEncoder;
pub use expander::Expander;
pub use loss::{covariance_loss, invariance_loss, variance_loss};
pub use vicreg::{build_branch, LossSummary, LossWeights, VicReg, VicRegLoss};
