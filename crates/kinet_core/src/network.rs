//! Species, reactions, rate laws and the frozen [`ReactionNetwork`].

use crate::equation_engine::{parse, Bytecode, Compiler, Expr};
use crate::error::{KineticsError, KineticsResult};
use crate::stoichiometry::StoichiometricMatrix;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Name of the time variable available inside rate expressions.
pub const TIME_VARIABLE: &str = "t";

fn non_negative_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub name: String,
    /// Negative values are clamped to zero before rate evaluation.
    #[serde(default = "non_negative_default")]
    pub non_negative: bool,
}

impl Species {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            non_negative: true,
        }
    }

    /// A species whose concentration may legitimately go negative
    /// (deviation variables, extents).
    pub fn unconstrained(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            non_negative: false,
        }
    }
}

impl From<&str> for Species {
    fn from(name: &str) -> Self {
        Species::new(name)
    }
}

/// How a reaction's rate depends on concentrations and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateLaw {
    /// rate = p[constant] · Π C_i^n_i
    PowerLaw {
        constant: String,
        orders: Vec<(String, f64)>,
    },
    /// Arbitrary expression over species, parameters and `t`.
    Expression { formula: String },
}

impl RateLaw {
    pub fn power_law(constant: &str, orders: &[(&str, f64)]) -> Self {
        RateLaw::PowerLaw {
            constant: constant.to_string(),
            orders: orders.iter().map(|(n, o)| (n.to_string(), *o)).collect(),
        }
    }

    pub fn expression(formula: impl Into<String>) -> Self {
        RateLaw::Expression {
            formula: formula.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub consumption: Vec<(String, f64)>,
    pub production: Vec<(String, f64)>,
    pub rate_law: RateLaw,
}

impl Reaction {
    pub fn new(consumption: &[(&str, f64)], production: &[(&str, f64)], rate_law: RateLaw) -> Self {
        Self {
            label: None,
            consumption: owned(consumption),
            production: owned(production),
            rate_law,
        }
    }

    /// Elementary reaction whose orders equal its consumption coefficients.
    pub fn mass_action(consumption: &[(&str, f64)], production: &[(&str, f64)], constant: &str) -> Self {
        Self::new(consumption, production, RateLaw::power_law(constant, consumption))
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn describe(&self, index: usize) -> String {
        match &self.label {
            Some(label) => format!("{} ({})", index, label),
            None => index.to_string(),
        }
    }
}

fn owned(entries: &[(&str, f64)]) -> Vec<(String, f64)> {
    entries.iter().map(|(n, c)| (n.to_string(), *c)).collect()
}

/// Rate law with names resolved to species/parameter indices.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CompiledRateLaw {
    PowerLaw {
        constant: usize,
        orders: Vec<(usize, f64)>,
    },
    Expression {
        code: Bytecode,
        time_dependent: bool,
    },
}

enum PendingRateLaw {
    PowerLaw(String, Vec<(usize, f64)>),
    Expression(Expr),
}

/// Immutable reaction network with its cached stoichiometric matrix.
#[derive(Debug, Clone)]
pub struct ReactionNetwork {
    species: Vec<Species>,
    reactions: Vec<Reaction>,
    index: HashMap<String, usize>,
    stoichiometry: StoichiometricMatrix,
    parameter_names: Vec<String>,
    compiled: Vec<CompiledRateLaw>,
    conservation: OnceLock<Vec<DVector<f64>>>,
}

/// Validates and freezes a reaction network.
pub fn build_network(species: Vec<Species>, reactions: Vec<Reaction>) -> KineticsResult<ReactionNetwork> {
    if species.is_empty() {
        return Err(KineticsError::invalid("network needs at least one species"));
    }
    if reactions.is_empty() {
        return Err(KineticsError::invalid("network needs at least one reaction"));
    }

    let mut index = HashMap::with_capacity(species.len());
    for (i, s) in species.iter().enumerate() {
        if s.name.trim().is_empty() {
            return Err(KineticsError::invalid(format!("species {} has an empty name", i)));
        }
        if s.name == TIME_VARIABLE {
            return Err(KineticsError::invalid(format!(
                "species name '{}' is reserved for time",
                TIME_VARIABLE
            )));
        }
        if index.insert(s.name.clone(), i).is_some() {
            return Err(KineticsError::invalid(format!("duplicate species {}", s.name)));
        }
    }

    let stoichiometry = StoichiometricMatrix::build(&index, &reactions)?;

    // First pass: every identifier that is neither a species nor `t` is a parameter.
    let mut parameters = BTreeSet::new();
    let mut pending = Vec::with_capacity(reactions.len());
    for (j, reaction) in reactions.iter().enumerate() {
        let invalid = |what: String| KineticsError::InvalidRateLaw {
            reaction: j,
            what: format!("{}: {}", reaction.describe(j), what),
        };
        match &reaction.rate_law {
            RateLaw::PowerLaw { constant, orders } => {
                if index.contains_key(constant) || constant == TIME_VARIABLE {
                    return Err(invalid(format!("rate constant '{}' shadows a variable", constant)));
                }
                let mut resolved = Vec::with_capacity(orders.len());
                for (name, order) in orders {
                    let i = *index
                        .get(name)
                        .ok_or_else(|| invalid(format!("order given for unknown species {}", name)))?;
                    if !order.is_finite() {
                        return Err(invalid(format!("order of {} is not finite", name)));
                    }
                    if *order != 0.0 {
                        resolved.push((i, *order));
                    }
                }
                parameters.insert(constant.clone());
                pending.push(PendingRateLaw::PowerLaw(constant.clone(), resolved));
            }
            RateLaw::Expression { formula } => {
                let expr = parse(formula).map_err(&invalid)?;
                for name in expr.identifiers() {
                    if !index.contains_key(&name) && name != TIME_VARIABLE {
                        parameters.insert(name);
                    }
                }
                pending.push(PendingRateLaw::Expression(expr));
            }
        }
    }
    let parameter_names: Vec<String> = parameters.into_iter().collect();

    let mut var_names: Vec<String> = species.iter().map(|s| s.name.clone()).collect();
    var_names.push(TIME_VARIABLE.to_string());
    let time_index = species.len();
    let compiler = Compiler::new(&var_names, &parameter_names);

    let mut compiled = Vec::with_capacity(reactions.len());
    for (j, law) in pending.into_iter().enumerate() {
        compiled.push(match law {
            PendingRateLaw::PowerLaw(constant, orders) => CompiledRateLaw::PowerLaw {
                constant: parameter_names
                    .iter()
                    .position(|name| *name == constant)
                    .unwrap_or_default(),
                orders,
            },
            PendingRateLaw::Expression(expr) => {
                let code = compiler
                    .compile(&expr)
                    .map_err(|what| KineticsError::InvalidRateLaw { reaction: j, what })?;
                let time_dependent = code.reads_var(time_index);
                CompiledRateLaw::Expression {
                    code,
                    time_dependent,
                }
            }
        });
    }

    log::debug!(
        "built reaction network: {} species, {} reactions, {} parameters",
        species.len(),
        reactions.len(),
        parameter_names.len()
    );

    Ok(ReactionNetwork {
        species,
        reactions,
        index,
        stoichiometry,
        parameter_names,
        compiled,
        conservation: OnceLock::new(),
    })
}

impl ReactionNetwork {
    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn dimension(&self) -> usize {
        self.species.len()
    }

    pub fn species_names(&self) -> Vec<String> {
        self.species.iter().map(|s| s.name.clone()).collect()
    }

    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn require_species(&self, name: &str) -> KineticsResult<usize> {
        self.species_index(name)
            .ok_or_else(|| KineticsError::invalid(format!("unknown species {}", name)))
    }

    /// Parameters referenced by any rate law, sorted by name.
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn stoichiometry(&self) -> &StoichiometricMatrix {
        &self.stoichiometry
    }

    pub(crate) fn compiled_rate_laws(&self) -> &[CompiledRateLaw] {
        &self.compiled
    }

    /// True when some rate expression reads `t`.
    pub fn is_time_dependent(&self) -> bool {
        self.compiled.iter().any(|law| {
            matches!(
                law,
                CompiledRateLaw::Expression {
                    time_dependent: true,
                    ..
                }
            )
        })
    }

    /// Conserved linear combinations of concentrations, computed once.
    pub fn conservation_laws(&self) -> &[DVector<f64>] {
        self.conservation
            .get_or_init(|| self.stoichiometry.conservation_laws())
    }

    /// Builds a state vector from named values; unnamed species start at zero.
    pub fn state_from(&self, values: &[(&str, f64)]) -> KineticsResult<Vec<f64>> {
        let mut state = vec![0.0; self.dimension()];
        for (name, value) in values {
            state[self.require_species(name)?] = *value;
        }
        Ok(state)
    }
}
