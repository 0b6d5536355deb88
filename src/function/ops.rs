//! Arithmetic operators for lazy functions.
//!
//! Any of [`Expr`], [`Parameter`] and [`MeshVariable`],
//! owned or borrowed, can be combined with each other and with `f64` literals.
//! Literals become anonymous parameters.

use super::{BinaryOp, Expr, Parameter, UnaryOp};
use crate::variable::MeshVariable;

// conversions

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Parameter(Parameter::new(value))
    }
}

impl From<Parameter> for Expr {
    fn from(p: Parameter) -> Self {
        Expr::Parameter(p)
    }
}

impl From<&Parameter> for Expr {
    fn from(p: &Parameter) -> Self {
        Expr::Parameter(p.clone())
    }
}

impl From<MeshVariable> for Expr {
    fn from(var: MeshVariable) -> Self {
        Expr::Variable(var)
    }
}

impl From<&MeshVariable> for Expr {
    fn from(var: &MeshVariable) -> Self {
        Expr::Variable(var.clone())
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

// binary operators

macro_rules! impl_binary_op {
    ($Trait:ident, $method:ident, $op:expr) => {
        impl_binary_op!(@lhs Expr, $Trait, $method, $op);
        impl_binary_op!(@lhs &Expr, $Trait, $method, $op);
        impl_binary_op!(@lhs Parameter, $Trait, $method, $op);
        impl_binary_op!(@lhs &Parameter, $Trait, $method, $op);
        impl_binary_op!(@lhs MeshVariable, $Trait, $method, $op);
        impl_binary_op!(@lhs &MeshVariable, $Trait, $method, $op);

        impl_binary_op!(@literal Expr, $Trait, $method, $op);
        impl_binary_op!(@literal &Expr, $Trait, $method, $op);
        impl_binary_op!(@literal Parameter, $Trait, $method, $op);
        impl_binary_op!(@literal &Parameter, $Trait, $method, $op);
        impl_binary_op!(@literal MeshVariable, $Trait, $method, $op);
        impl_binary_op!(@literal &MeshVariable, $Trait, $method, $op);
    };
    (@lhs $Lhs:ty, $Trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> std::ops::$Trait<R> for $Lhs {
            type Output = Expr;

            fn $method(self, rhs: R) -> Self::Output {
                Expr::binary($op, self, rhs)
            }
        }
    };
    // literal on the left hand side
    (@literal $Rhs:ty, $Trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$Trait<$Rhs> for f64 {
            type Output = Expr;

            fn $method(self, rhs: $Rhs) -> Self::Output {
                Expr::binary($op, self, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);

// Neg

macro_rules! impl_neg {
    ($($T:ty),*) => {
        $(
            impl std::ops::Neg for $T {
                type Output = Expr;

                fn neg(self) -> Self::Output {
                    Expr::unary(UnaryOp::Neg, self)
                }
            }
        )*
    };
}

impl_neg!(Expr, &Expr, Parameter, &Parameter, MeshVariable, &MeshVariable);

//
// tests
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tiny_mesh_2d;
    use nalgebra as na;

    #[test]
    fn literals_combine_from_either_side() {
        let mesh = tiny_mesh_2d();
        let p = Parameter::named("p", 3.0);

        let cases: [(Expr, f64); 8] = [
            (&p + 1.0, 4.0),
            (1.0 + &p, 4.0),
            (&p - 1.0, 2.0),
            (1.0 - &p, -2.0),
            (2.0 * &p, 6.0),
            (&p / 2.0, 1.5),
            (6.0 / p.clone(), 2.0),
            (-(&p * &p) + 10.0, 1.0),
        ];
        for (expr, expected) in cases {
            let values = expr.evaluate(&mesh).unwrap();
            assert_eq!(values, na::DVector::from_element(7, expected), "{expr}");
        }
    }

    #[test]
    fn variables_and_expressions_mix() {
        let mesh = tiny_mesh_2d().into_shared();
        let h = MeshVariable::new("h", mesh.clone());
        h.set_data(na::DVector::from_element(7, 2.0)).unwrap();
        let e = &h * &h;

        let f = &e - &h + (h.clone() / e.clone()) - 0.5 * -e.clone();
        // 4 - 2 + 0.5 + 2
        assert_eq!(f.evaluate(&mesh).unwrap(), na::DVector::from_element(7, 4.5));
        assert_eq!(h.pow(3.0).evaluate(&mesh).unwrap()[0], 8.0);
        assert_eq!(f.description(), "((((h * h) - h) + (h / (h * h))) - (0.5 * -(h * h)))");
    }
}
