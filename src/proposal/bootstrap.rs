use super::Proposal;
use crate::process::StateSpaceModel;
use nalgebra::DVector;
use rand::RngCore;

/// The elementary SISR proposal: propagate from the hidden transition
/// kernel and weight purely by the observation density. Always applicable,
/// never the lowest-variance choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bootstrap;

impl Proposal for Bootstrap {
    fn draw(
        &self,
        _y: &DVector<f64>,
        x_old: &DVector<f64>,
        model: &StateSpaceModel,
        rng: &mut dyn RngCore,
    ) -> DVector<f64> {
        model.hidden.propagate(x_old, rng)
    }

    fn log_weight(
        &self,
        y: &DVector<f64>,
        x_new: &DVector<f64>,
        _x_old: &DVector<f64>,
        model: &StateSpaceModel,
    ) -> f64 {
        model.observable.weight(y, x_new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::Parameter;
    use crate::process::{BaseProcess, InitMeanFn, InitScaleFn, MeanFn, Observable, ScaleFn};
    use rand_pcg::Pcg64Mcg;
    use std::sync::Arc;

    fn model() -> StateSpaceModel {
        let f0: InitMeanFn = Arc::new(|_p| DVector::from_element(1, 0.0));
        let g0: InitScaleFn = Arc::new(|_p| DVector::from_element(1, 1.0));
        let f: MeanFn = Arc::new(|x, _p| x.clone());
        let g: ScaleFn = Arc::new(|_x, _p| DVector::from_element(1, 1.0));
        let hidden = BaseProcess::new(vec![Parameter::fixed("dummy", 0.0)], f0, g0, f, g).unwrap();
        let of: MeanFn = Arc::new(|x, _p| x.clone());
        let og: ScaleFn = Arc::new(|_x, _p| DVector::from_element(1, 0.5));
        let observable = Observable::new(vec![], of, og).unwrap();
        StateSpaceModel::new(hidden, observable)
    }

    #[test]
    fn draw_matches_hidden_propagate_given_the_same_rng_stream() {
        let m = model();
        let x_old = DVector::from_element(1, 1.0);
        let mut rng_a = Pcg64Mcg::new(1);
        let mut rng_b = Pcg64Mcg::new(1);
        let from_proposal = Bootstrap.draw(&DVector::from_element(1, 0.0), &x_old, &m, &mut rng_a);
        let from_model = m.hidden.propagate(&x_old, &mut rng_b);
        assert_eq!(from_proposal, from_model);
    }

    #[test]
    fn log_weight_matches_observable_weight() {
        let m = model();
        let y = DVector::from_element(1, 0.2);
        let x_new = DVector::from_element(1, 0.3);
        let x_old = DVector::from_element(1, 0.1);
        assert_eq!(Bootstrap.log_weight(&y, &x_new, &x_old, &m), m.observable.weight(&y, &x_new));
    }
}
