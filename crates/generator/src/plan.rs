//! Compiled sampling plans.

use crate::GeneratorError;
use montecarlo_types::{Bounds, Scenario, VariableDefinition, VariableDefinitions};
use rand::distributions::{Distribution, Uniform, WeightedIndex};
use rand::Rng;
use rand_distr::Normal;

/// Per-variable sampler with its distribution pre-built.
#[derive(Debug, Clone)]
enum Sampler {
    Constant(f64),
    Discrete {
        values: Vec<f64>,
        index: WeightedIndex<f64>,
    },
    Uniform(Uniform<f64>),
    Normal {
        normal: Normal<f64>,
        bounds: Option<Bounds>,
    },
}

impl Sampler {
    fn compile(variable: &str, definition: &VariableDefinition) -> Result<Self, GeneratorError> {
        definition.validate(variable)?;

        let sampler = match definition {
            VariableDefinition::Constant { value } => Sampler::Constant(*value),
            VariableDefinition::Discrete {
                values,
                probabilities,
            } => Sampler::Discrete {
                values: values.clone(),
                index: WeightedIndex::new(probabilities).map_err(|e| {
                    GeneratorError::Distribution {
                        variable: variable.to_string(),
                        reason: e.to_string(),
                    }
                })?,
            },
            // validate() guarantees lo < hi with a span of at most MAX_UNIFORM_SPAN.
            VariableDefinition::Uniform { lo, hi } => Sampler::Uniform(Uniform::new(*lo, *hi)),
            VariableDefinition::Normal {
                mean,
                stddev,
                bounds,
            } => Sampler::Normal {
                normal: Normal::new(*mean, *stddev).map_err(|e| GeneratorError::Distribution {
                    variable: variable.to_string(),
                    reason: e.to_string(),
                })?,
                bounds: *bounds,
            },
        };
        Ok(sampler)
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Sampler::Constant(value) => *value,
            Sampler::Discrete { values, index } => values[index.sample(rng)],
            Sampler::Uniform(uniform) => uniform.sample(rng),
            Sampler::Normal { normal, bounds } => {
                let value = normal.sample(rng);
                match bounds {
                    Some(Bounds { lo, hi }) => value.clamp(*lo, *hi),
                    None => value,
                }
            }
        }
    }
}

/// Variable definitions compiled into ready-to-draw distributions.
///
/// Immutable once built; share it behind an `Arc` and give each task its own
/// RNG.
#[derive(Debug, Clone)]
pub struct SamplingPlan {
    samplers: Vec<(String, Sampler)>,
}

impl SamplingPlan {
    pub fn compile(definitions: &VariableDefinitions) -> Result<Self, GeneratorError> {
        let samplers = definitions
            .iter()
            .map(|(name, definition)| Ok((name.clone(), Sampler::compile(name, definition)?)))
            .collect::<Result<Vec<_>, GeneratorError>>()?;
        Ok(Self { samplers })
    }

    /// Draw one scenario. Variables are drawn in declaration order, so the
    /// same RNG state always yields the same scenario.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Scenario {
        self.samplers
            .iter()
            .map(|(name, sampler)| (name.clone(), sampler.draw(rng)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }
}

/// Draw one scenario from `definitions`.
///
/// Compiles a plan on every call; use [`SamplingPlan`] directly when drawing
/// repeatedly.
pub fn sample<R: Rng + ?Sized>(
    rng: &mut R,
    definitions: &VariableDefinitions,
) -> Result<Scenario, GeneratorError> {
    Ok(SamplingPlan::compile(definitions)?.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use montecarlo_types::ConfigurationError;
    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn definitions(entries: Vec<(&str, VariableDefinition)>) -> VariableDefinitions {
        entries
            .into_iter()
            .map(|(name, definition)| (name.to_string(), definition))
            .collect()
    }

    fn mixed() -> VariableDefinitions {
        definitions(vec![
            (
                "cantidad",
                VariableDefinition::Discrete {
                    values: vec![1.0, 2.0, 3.0],
                    probabilities: vec![0.2, 0.5, 0.3],
                },
            ),
            ("precio", VariableDefinition::Uniform { lo: 10.0, hi: 20.0 }),
            (
                "demanda",
                VariableDefinition::Normal {
                    mean: 100.0,
                    stddev: 15.0,
                    bounds: Some(Bounds::new(90.0, 110.0)),
                },
            ),
            ("fijo", VariableDefinition::Constant { value: 7.5 }),
        ])
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let defs = mixed();
        let a = sample(&mut ChaCha8Rng::seed_from_u64(42), &defs).unwrap();
        let b = sample(&mut ChaCha8Rng::seed_from_u64(42), &defs).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_values_respect_definitions() {
        let plan = SamplingPlan::compile(&mixed()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..2_000 {
            let scenario = plan.sample(&mut rng);
            assert!([1.0, 2.0, 3.0].contains(&scenario.get("cantidad").unwrap()));

            let precio = scenario.get("precio").unwrap();
            assert!((10.0..20.0).contains(&precio));

            let demanda = scenario.get("demanda").unwrap();
            assert!((90.0..=110.0).contains(&demanda));

            assert_eq!(scenario.get("fijo"), Some(7.5));
        }
    }

    #[test]
    fn test_normal_clipping_piles_mass_on_bounds() {
        // With bounds at +-0.5 sigma roughly 62% of draws fall outside and are
        // clipped onto the bounds exactly.
        let defs = definitions(vec![(
            "n",
            VariableDefinition::Normal {
                mean: 0.0,
                stddev: 1.0,
                bounds: Some(Bounds::new(-0.5, 0.5)),
            },
        )]);
        let plan = SamplingPlan::compile(&defs).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let on_bounds = (0..10_000)
            .map(|_| plan.sample(&mut rng).get("n").unwrap())
            .filter(|v| *v == -0.5 || *v == 0.5)
            .count();
        assert!((5_500..7_000).contains(&on_bounds), "on_bounds = {on_bounds}");
    }

    #[test]
    fn test_discrete_frequencies() {
        let defs = definitions(vec![(
            "d",
            VariableDefinition::Discrete {
                values: vec![0.0, 1.0],
                probabilities: vec![0.25, 0.75],
            },
        )]);
        let plan = SamplingPlan::compile(&defs).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(99);

        let ones: f64 = (0..20_000).map(|_| plan.sample(&mut rng).get("d").unwrap()).sum();
        let ratio = ones / 20_000.0;
        assert!((ratio - 0.75).abs() < 0.02, "ratio = {ratio}");
    }

    #[test]
    fn test_constants_consume_no_randomness() {
        let defs = definitions(vec![("c", VariableDefinition::Constant { value: 1.0 })]);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        sample(&mut rng, &defs).unwrap();
        assert_eq!(rng.next_u64(), ChaCha8Rng::seed_from_u64(5).next_u64());
    }

    #[test]
    fn test_zero_weight_outcome_never_drawn() {
        let defs = definitions(vec![(
            "d",
            VariableDefinition::Discrete {
                values: vec![1.0, 2.0],
                probabilities: vec![0.0, 1.0],
            },
        )]);
        let plan = SamplingPlan::compile(&defs).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!((0..500).all(|_| plan.sample(&mut rng).get("d") == Some(2.0)));
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let defs = definitions(vec![("u", VariableDefinition::Uniform { lo: 1.0, hi: 1.0 })]);
        let err = SamplingPlan::compile(&defs).unwrap_err();
        assert!(matches!(
            err,
            GeneratorError::Configuration(ConfigurationError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_overflowing_uniform_range_is_an_error() {
        let defs = definitions(vec![(
            "u",
            VariableDefinition::Uniform {
                lo: -1e308,
                hi: 1e308,
            },
        )]);
        let err = SamplingPlan::compile(&defs).unwrap_err();
        assert!(matches!(
            err,
            GeneratorError::Configuration(ConfigurationError::RangeOverflow { .. })
        ));
    }

    #[test]
    fn test_widest_uniform_range_samples_finite_values() {
        let defs = definitions(vec![(
            "u",
            VariableDefinition::Uniform {
                lo: 0.0,
                hi: montecarlo_types::MAX_UNIFORM_SPAN,
            },
        )]);
        let plan = SamplingPlan::compile(&defs).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            assert!(plan.sample(&mut rng).get("u").unwrap().is_finite());
        }
    }
}
