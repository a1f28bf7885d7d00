//! Transactional Metropolis-Hastings proposals over admixture graphs.
//!
//! Every kernel edits a [`model::ChainState`] in place and can take the
//! edit back exactly; [`transaction::ProposalTransaction`] wraps a kernel
//! in the propose / commit / rollback protocol and [`sampler::Sampler`]
//! drives a weighted schedule of them.

pub mod branch_rates;
pub mod chain;
pub mod io;
pub mod kernels;
pub mod model;
pub mod monitor;
pub mod prior_model;
pub mod random;
pub mod residuals;
pub mod sampler;
pub mod transaction;
