//! Benchmark profiles for sdbtrace.
//!
//! - [`reference_model`]: block-structured model with the default access
//!   distributions
//! - [`reference_operations`]: a deterministic operation stream generated
//!   from it, together with the dictionaries it was encoded against

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use sdbtrace_dict::DictionaryContext;
use sdbtrace_replay::Operation;
use sdbtrace_stochastic::{
    Generator, GeneratorConfig, GeneratorError, SimulationModel, UniformConfig,
};

/// Ten transactions of about twenty operations per block, a hundred blocks
/// per sync period.
pub fn reference_model() -> Result<SimulationModel, GeneratorError> {
    SimulationModel::uniform(&UniformConfig {
        block_length: 10,
        sync_period_length: 100,
        transaction_length: 20,
        ..UniformConfig::default()
    })
}

/// Build a generator of `length` operations over [`reference_model`].
pub fn reference_generator(seed: u64, length: u64) -> Result<Generator, GeneratorError> {
    let model = reference_model()?;
    let config = GeneratorConfig {
        seed,
        ..GeneratorConfig::default()
    };
    Generator::new(
        model.to_matrix()?,
        model.to_distributions()?,
        config,
        length,
    )
}

/// Generate `length` operations and return them with their dictionaries.
pub fn reference_operations(
    seed: u64,
    length: u64,
) -> Result<(Vec<Operation>, DictionaryContext), GeneratorError> {
    let mut generator = reference_generator(seed, length)?;
    let ops = generator.by_ref().collect::<Result<Vec<_>, _>>()?;
    Ok((ops, generator.into_context()))
}
