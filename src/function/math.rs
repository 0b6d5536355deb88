//! Elementwise math functions and vector calculus on lazy functions.

use super::{Expr, FnError, UnaryOp};

macro_rules! unary_fns {
    ($($(#[$attr:meta])* $name:ident => $op:ident;)*) => {
        $(
            $(#[$attr])*
            pub fn $name(x: impl Into<Expr>) -> Expr {
                Expr::unary(UnaryOp::$op, x)
            }
        )*
    };
}

unary_fns! {
    /// Sine.
    sin => Sin;
    /// Cosine.
    cos => Cos;
    /// Tangent.
    tan => Tan;
    /// Arcsine, NaN outside `[-1, 1]`.
    asin => Asin;
    /// Arccosine, NaN outside `[-1, 1]`.
    acos => Acos;
    /// Arctangent.
    atan => Atan;
    /// Hyperbolic sine.
    sinh => Sinh;
    /// Hyperbolic cosine.
    cosh => Cosh;
    /// Hyperbolic tangent.
    tanh => Tanh;
    /// Inverse hyperbolic sine.
    asinh => Asinh;
    /// Inverse hyperbolic cosine, NaN below 1.
    acosh => Acosh;
    /// Inverse hyperbolic tangent, NaN outside `[-1, 1]`.
    atanh => Atanh;
    /// Exponential function.
    exp => Exp;
    /// Natural logarithm.
    ln => Ln;
    /// Base-10 logarithm.
    log10 => Log10;
    /// Square root, NaN for negative values.
    sqrt => Sqrt;
    /// Absolute value.
    abs => Abs;
}

/// The gradient of a scalar function as lazy functions for both directions.
pub fn grad(f: impl Into<Expr>) -> Result<(Expr, Expr), FnError> {
    let f: Expr = f.into();
    Ok((f.fn_gradient(0)?, f.fn_gradient(1)?))
}

/// The divergence of the vector field `(u, v)`.
pub fn div(u: impl Into<Expr>, v: impl Into<Expr>) -> Result<Expr, FnError> {
    let (u, v): (Expr, Expr) = (u.into(), v.into());
    Ok(u.fn_gradient(0)? + v.fn_gradient(1)?)
}

/// The scalar curl of the vector field `(u, v)`, `dv/dX - du/dY`.
pub fn curl(u: impl Into<Expr>, v: impl Into<Expr>) -> Result<Expr, FnError> {
    let (u, v): (Expr, Expr) = (u.into(), v.into());
    Ok(v.fn_gradient(0)? - u.fn_gradient(1)?)
}

//
// tests
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        function::misc::coord,
        mesh::{tiny_mesh_2d, unit_square},
        Axis, Mesh, MeshVariable,
    };
    use approx::assert_relative_eq;
    use nalgebra as na;

    #[test]
    fn functions_apply_elementwise() {
        let mesh = tiny_mesh_2d();
        let x = coord(Axis::X);
        let cases: [(Expr, fn(f64) -> f64); 6] = [
            (sin(&x), f64::sin),
            (atan(&x), f64::atan),
            (tanh(&x), f64::tanh),
            (exp(&x), f64::exp),
            (abs(&x), f64::abs),
            (cosh(&x), f64::cosh),
        ];
        for (expr, f) in cases {
            let values = expr.evaluate(&mesh).unwrap();
            for (c, v) in mesh.coords().iter().zip(values.iter()) {
                assert_eq!(*v, f(c.x), "{expr}");
            }
        }
        assert_eq!(ln(exp(&x)).description(), "ln(exp(X))");
    }

    #[test]
    fn vector_calculus_identities() {
        let mesh = unit_square(21).into_shared();
        let f = MeshVariable::new("f", mesh.clone());
        f.assign(coord(Axis::X).pow(2.0) * coord(Axis::Y) + coord(Axis::Y).pow(2.0))
            .unwrap();

        let (fx, fy) = grad(&f).unwrap();
        assert_eq!(fx.description(), "d(f)/dX");
        let laplacian = div(&fx, &fy).unwrap().evaluate(&mesh).unwrap();
        let vorticity = curl(&fx, &fy).unwrap().evaluate(&mesh).unwrap();
        let fx = fx.evaluate(&mesh).unwrap();

        // stencils are exact for quadratics away from the boundary
        let inner = |c: &crate::Vec2| c.iter().all(|&x| x > 0.15 && x < 0.85);
        for (i, c) in mesh.coords().iter().enumerate() {
            if !inner(c) {
                continue;
            }
            assert_relative_eq!(fx[i], 2.0 * c.x * c.y, epsilon = 1e-10);
            assert_relative_eq!(laplacian[i], 2.0 * c.y + 2.0, epsilon = 1e-8);
            assert_relative_eq!(vorticity[i], 0.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn vector_calculus_of_constants_is_zero() {
        let mesh = tiny_mesh_2d();
        let (dx, dy) = grad(4.0).unwrap();
        assert_eq!(dx.evaluate(&mesh).unwrap(), na::DVector::zeros(7));
        assert_eq!(dy.evaluate(&mesh).unwrap(), na::DVector::zeros(7));
        assert!(matches!(div(coord(Axis::X), 1.0), Err(FnError::Unsupported(_))));
    }
}
