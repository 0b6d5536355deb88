//! Coordinates, conditionals and other building blocks for lazy functions.

use super::{BinaryOp, Expr};
use crate::mesh::Axis;

use std::rc::Rc;

/// The native coordinate along `axis` of each evaluation point.
///
/// On a spherical mesh these are longitude and latitude in radians.
pub fn coord(axis: Axis) -> Expr {
    Expr::Coord(axis)
}

/// Pick `then` where `selector` is non-negative and `otherwise` elsewhere,
/// including where `selector` is NaN.
///
/// The gradient of the result selects between the gradients of the branches,
/// ignoring the discontinuity where the selector changes sign.
pub fn where_(
    selector: impl Into<Expr>,
    then: impl Into<Expr>,
    otherwise: impl Into<Expr>,
) -> Expr {
    Expr::Where {
        selector: Rc::new(selector.into()),
        then: Rc::new(then.into()),
        otherwise: Rc::new(otherwise.into()),
    }
}

/// 1 where `f` is greater than `alpha` and 0 elsewhere,
/// or the other way around with `invert`
/// (1 where `f` is less than `alpha`).
pub fn levelset(f: impl Into<Expr>, alpha: impl Into<Expr>, invert: bool) -> Expr {
    let f: Expr = f.into();
    let alpha: Expr = alpha.into();
    if invert {
        where_(f - alpha, 0.0, 1.0)
    } else {
        where_(alpha - f, 0.0, 1.0)
    }
}

/// The pointwise larger of `a` and `b`, ignoring NaNs.
pub fn maximum(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::binary(BinaryOp::Max, a, b)
}

/// The pointwise smaller of `a` and `b`, ignoring NaNs.
pub fn minimum(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::binary(BinaryOp::Min, a, b)
}

//
// tests
//
