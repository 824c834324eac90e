//! Soft constraint coefficients.

use crate::fph;
use std::f64::consts::TAU;

/// How the springiness of a soft constraint is specified.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SpringSettings {
    /// Oscillation frequency in Hz and dimensionless damping ratio
    /// (1 = critical damping). A non-positive frequency makes the
    /// constraint hard.
    FrequencyAndDamping { frequency: fph, damping: fph },
    /// Spring stiffness (as in Hooke's law) and damping coefficient. A
    /// non-positive stiffness makes the constraint hard.
    StiffnessAndDamping { stiffness: fph, damping: fph },
}

/// The bias and softness coefficients that turn a hard constraint into an
/// implicitly integrated damped spring. Owned by an enclosing constraint
/// part and reinitialized at every setup.
///
/// With softness γ and bias factor β derived from the spring parameters,
/// the velocity law solves `jv − (γ·λ_total + bias + β·C)` against the
/// softened effective mass `1 / (K + γ)`. γ = 0 recovers the hard
/// constraint. The formulas follow from implicit-Euler integration of a
/// damped harmonic oscillator, which keeps the constraint unconditionally
/// stable.
#[derive(Copy, Clone, Debug, Default)]
pub struct SpringPart {
    bias: fph,
    softness: fph,
}

impl SpringSettings {
    /// Whether these settings produce an actual spring rather than a hard
    /// constraint.
    pub fn has_stiffness(&self) -> bool {
        match *self {
            Self::FrequencyAndDamping { frequency, .. } => frequency > 0.0,
            Self::StiffnessAndDamping { stiffness, .. } => stiffness > 0.0,
        }
    }
}

impl Default for SpringSettings {
    fn default() -> Self {
        Self::FrequencyAndDamping {
            frequency: 0.0,
            damping: 0.0,
        }
    }
}

impl SpringPart {
    /// Configures a hard constraint with the given velocity bias and returns
    /// the effective mass `1 / K` for the given inverse effective mass `K`.
    ///
    /// The caller must ensure `K > 0`.
    pub fn setup_hard(&mut self, inv_effective_mass: fph, bias: fph) -> fph {
        self.softness = 0.0;
        self.bias = bias;
        1.0 / inv_effective_mass
    }

    /// Configures the spring from the given settings, current constraint
    /// error and velocity bias, and returns the softened effective mass.
    pub fn setup(
        &mut self,
        settings: &SpringSettings,
        inv_effective_mass: fph,
        constraint_error: fph,
        bias: fph,
        dt: fph,
    ) -> fph {
        match *settings {
            SpringSettings::FrequencyAndDamping { frequency, damping } => self
                .setup_with_frequency_and_damping(
                    inv_effective_mass,
                    frequency,
                    damping,
                    constraint_error,
                    bias,
                    dt,
                ),
            SpringSettings::StiffnessAndDamping { stiffness, damping } => self
                .setup_with_stiffness_and_damping(
                    inv_effective_mass,
                    stiffness,
                    damping,
                    constraint_error,
                    bias,
                    dt,
                ),
        }
    }

    /// Configures the spring from an oscillation frequency (Hz) and damping
    /// ratio, and returns the softened effective mass. A non-positive
    /// frequency degenerates to a hard constraint.
    pub fn setup_with_frequency_and_damping(
        &mut self,
        inv_effective_mass: fph,
        frequency: fph,
        damping_ratio: fph,
        constraint_error: fph,
        bias: fph,
        dt: fph,
    ) -> fph {
        if frequency <= 0.0 {
            return self.setup_hard(inv_effective_mass, bias);
        }
        let mass = 1.0 / inv_effective_mass;
        let omega = TAU * frequency;
        let stiffness = mass * omega * omega;
        let damping = 2.0 * mass * damping_ratio * omega;
        self.setup_soft(
            inv_effective_mass,
            stiffness,
            damping,
            constraint_error,
            bias,
            dt,
        )
    }

    /// Configures the spring from a stiffness and damping coefficient, and
    /// returns the softened effective mass. A non-positive stiffness
    /// degenerates to a hard constraint.
    pub fn setup_with_stiffness_and_damping(
        &mut self,
        inv_effective_mass: fph,
        stiffness: fph,
        damping: fph,
        constraint_error: fph,
        bias: fph,
        dt: fph,
    ) -> fph {
        if stiffness <= 0.0 {
            return self.setup_hard(inv_effective_mass, bias);
        }
        self.setup_soft(
            inv_effective_mass,
            stiffness,
            damping,
            constraint_error,
            bias,
            dt,
        )
    }

    fn setup_soft(
        &mut self,
        inv_effective_mass: fph,
        stiffness: fph,
        damping: fph,
        constraint_error: fph,
        bias: fph,
        dt: fph,
    ) -> fph {
        let softness = 1.0 / (dt * (damping + dt * stiffness));
        let bias_factor = dt * stiffness * softness;
        self.softness = softness;
        self.bias = bias + bias_factor * constraint_error;
        1.0 / (inv_effective_mass + softness)
    }

    /// The stored velocity bias (including the positional spring term).
    pub fn bias(&self) -> fph {
        self.bias
    }

    /// The softness γ. Zero for a hard constraint.
    pub fn softness(&self) -> fph {
        self.softness
    }

    /// Whether the constraint is soft (γ > 0).
    pub fn has_softness(&self) -> bool {
        self.softness != 0.0
    }

    /// The total bias entering the velocity law for the given accumulated
    /// impulse, using the soft-constraint accumulation term `γ·λ_total`.
    pub fn total_bias(&self, total_lambda: fph) -> fph {
        self.softness * total_lambda + self.bias
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn should_return_inverse_of_k_for_hard_constraint() {
        let mut spring = SpringPart::default();
        let effective_mass = spring.setup_hard(4.0, 0.5);
        assert_abs_diff_eq!(effective_mass, 0.25);
        assert_abs_diff_eq!(spring.bias(), 0.5);
        assert_abs_diff_eq!(spring.softness(), 0.0);
        assert!(!spring.has_softness());
    }

    #[test]
    fn should_degenerate_to_hard_for_non_positive_frequency() {
        let mut spring = SpringPart::default();
        let effective_mass =
            spring.setup_with_frequency_and_damping(2.0, 0.0, 1.0, 0.1, 0.0, 1.0 / 60.0);
        assert_abs_diff_eq!(effective_mass, 0.5);
        assert!(!spring.has_softness());
    }

    #[test]
    fn should_degenerate_to_hard_for_non_positive_stiffness() {
        let mut spring = SpringPart::default();
        let effective_mass =
            spring.setup_with_stiffness_and_damping(2.0, -1.0, 1.0, 0.1, 0.0, 1.0 / 60.0);
        assert_abs_diff_eq!(effective_mass, 0.5);
        assert!(!spring.has_softness());
    }

    #[test]
    fn should_soften_effective_mass_for_spring() {
        let mut spring = SpringPart::default();
        let inv_k = 2.0;
        let effective_mass =
            spring.setup_with_frequency_and_damping(inv_k, 2.0, 0.5, 0.1, 0.0, 1.0 / 60.0);
        assert!(spring.has_softness());
        assert!(effective_mass < 1.0 / inv_k);
        assert!(spring.bias() > 0.0);
    }

    #[test]
    fn should_recover_frequency_path_from_equivalent_stiffness() {
        // The frequency/damping-ratio parametrization and the raw
        // stiffness/damping parametrization must produce identical
        // coefficients when they describe the same oscillator.
        let inv_k = 2.0;
        let mass = 1.0 / inv_k;
        let frequency = 3.0;
        let damping_ratio = 0.7;
        let omega = TAU * frequency;
        let stiffness = mass * omega * omega;
        let damping = 2.0 * mass * damping_ratio * omega;
        let (error, bias, dt) = (0.05, 0.01, 1.0 / 120.0);

        let mut from_frequency = SpringPart::default();
        let mass_from_frequency = from_frequency
            .setup_with_frequency_and_damping(inv_k, frequency, damping_ratio, error, bias, dt);

        let mut from_stiffness = SpringPart::default();
        let mass_from_stiffness = from_stiffness
            .setup_with_stiffness_and_damping(inv_k, stiffness, damping, error, bias, dt);

        assert_abs_diff_eq!(mass_from_frequency, mass_from_stiffness, epsilon = 1e-12);
        assert_abs_diff_eq!(
            from_frequency.softness(),
            from_stiffness.softness(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(from_frequency.bias(), from_stiffness.bias(), epsilon = 1e-12);
    }

    #[test]
    fn should_accumulate_softness_term_into_total_bias() {
        let mut spring = SpringPart::default();
        spring.setup_with_stiffness_and_damping(1.0, 100.0, 10.0, 0.0, 0.25, 1.0 / 60.0);
        let total = spring.total_bias(2.0);
        assert_abs_diff_eq!(total, spring.softness() * 2.0 + spring.bias());
    }
}
