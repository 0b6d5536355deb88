//! Lazy functions: deferred expressions over mesh variables and parameters.
//!
//! An [`Expr`] records operations instead of performing them.
//! Nothing is computed until [`Expr::evaluate`] is called,
//! at which point the whole tree is walked against the current data
//! of every [`MeshVariable`] and the current value of every [`Parameter`] it refers to.
//! An expression built once before a time-stepping loop
//! therefore always reflects the latest state of its inputs.
//!
//! ```
//! # use meshfn::{function::{math, misc}, Axis, MeshVariable, Parameter, PlanarMesh, Vec2};
//! let mesh = PlanarMesh::structured(Vec2::zeros(), Vec2::new(1.0, 1.0), 11, 11)?.into_shared();
//! let h = MeshVariable::new("h", mesh.clone());
//! h.assign(math::sin(misc::coord(Axis::X)))?;
//!
//! let k = Parameter::named("k", 2.0);
//! let f = &k * &h + 1.0;
//! assert_eq!(f.description(), "((k * h) + 1.0)");
//!
//! let before = f.evaluate(&mesh)?;
//! k.set(3.0);
//! let after = f.evaluate(&mesh)?;
//! assert!((after[5] - 1.0) > (before[5] - 1.0));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Gradients are never symbolic.
//! [`fn_gradient`][Expr::fn_gradient] returns another lazy node
//! that evaluates its operand at the points of a mesh
//! and applies the mesh's numerical derivative operator to the result.

pub mod math;
pub mod misc;
mod ops;

use nalgebra as na;

use std::{borrow::Cow, cell::Cell, fmt, rc::Rc};

use crate::{
    mesh::{Axis, Geometry, Mesh, MeshError, MeshId, TriMesh},
    parallel::SyncError,
    variable::MeshVariable,
    Vec2,
};

/// Error in building or evaluating a lazy function.
#[derive(thiserror::Error, Debug)]
pub enum FnError {
    /// Operands evaluated to arrays of different lengths.
    #[error("Operand arrays have incompatible lengths {expected} and {found}")]
    ShapeMismatch {
        /// Length of the first operand or the required length.
        expected: usize,
        /// Length of the offending operand.
        found: usize,
    },
    /// Tried to replace the data of a locked variable.
    #[error("Mesh variable `{name}` is locked")]
    LockedVariable {
        /// Name of the variable.
        name: String,
    },
    /// A direction index other than 0 or 1 was given.
    #[error("Invalid direction {0}, expected 0 or 1")]
    InvalidDirection(usize),
    /// The operation isn't defined for the given operands.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// An expression mixes variables living on different meshes.
    #[error("Expression refers to variables on more than one mesh")]
    MeshMismatch,
    /// The underlying mesh operation failed.
    #[error(transparent)]
    Mesh(#[from] MeshError),
    /// Synchronizing a variable failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

//
// evaluation target
//

/// Where a lazy function is evaluated.
#[derive(Clone, Debug)]
pub enum Target<'a> {
    /// Every point of a mesh, at its native coordinates.
    /// Variables living on this mesh are returned without interpolation.
    Mesh(&'a dyn Mesh),
    /// Arbitrary points in native coordinates.
    Points(Cow<'a, [Vec2]>),
}

impl<'a> Target<'a> {
    /// Coordinates of the points evaluated at.
    pub fn coords(&self) -> &[Vec2] {
        match self {
            Target::Mesh(mesh) => mesh.coords(),
            Target::Points(points) => &points[..],
        }
    }

    /// Number of points evaluated at.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Target::Mesh(mesh) => mesh.point_count(),
            Target::Points(points) => points.len(),
        }
    }

    /// Whether there are no points to evaluate at.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity of the mesh evaluated on, if any.
    #[inline]
    pub fn mesh_id(&self) -> Option<MeshId> {
        match self {
            Target::Mesh(mesh) => Some(mesh.id()),
            Target::Points(_) => None,
        }
    }

    /// Bring nodal values of `mesh` to the points of this target.
    fn resample(
        &self,
        mesh: &dyn Mesh,
        nodal: &na::DVector<f64>,
    ) -> Result<na::DVector<f64>, FnError> {
        if self.mesh_id() == Some(mesh.id()) {
            return Ok(nodal.clone());
        }
        Ok(mesh.interpolate(nodal, self.coords())?)
    }
}

impl<'a> From<&'a dyn Mesh> for Target<'a> {
    fn from(mesh: &'a dyn Mesh) -> Self {
        Target::Mesh(mesh)
    }
}

impl<'a> From<&'a Rc<dyn Mesh>> for Target<'a> {
    fn from(mesh: &'a Rc<dyn Mesh>) -> Self {
        Target::Mesh(&**mesh)
    }
}

impl<'a, G: Geometry> From<&'a TriMesh<G>> for Target<'a> {
    fn from(mesh: &'a TriMesh<G>) -> Self {
        Target::Mesh(mesh)
    }
}

impl<'a, G: Geometry> From<&'a Rc<TriMesh<G>>> for Target<'a> {
    fn from(mesh: &'a Rc<TriMesh<G>>) -> Self {
        Target::Mesh(&**mesh)
    }
}

impl<'a> From<&'a [Vec2]> for Target<'a> {
    fn from(points: &'a [Vec2]) -> Self {
        Target::Points(Cow::Borrowed(points))
    }
}

impl<'a> From<&'a Vec<Vec2>> for Target<'a> {
    fn from(points: &'a Vec<Vec2>) -> Self {
        Target::Points(Cow::Borrowed(points))
    }
}

impl From<Vec<Vec2>> for Target<'static> {
    fn from(points: Vec<Vec2>) -> Self {
        Target::Points(Cow::Owned(points))
    }
}

impl From<Vec2> for Target<'static> {
    fn from(point: Vec2) -> Self {
        Target::Points(Cow::Owned(vec![point]))
    }
}

impl From<(f64, f64)> for Target<'static> {
    fn from((x, y): (f64, f64)) -> Self {
        Vec2::new(x, y).into()
    }
}

//
// parameters
//

/// A named scalar that can be changed after expressions using it are built.
///
/// Clones share the same value.
#[derive(Clone, Debug)]
pub struct Parameter(Rc<ParameterInner>);

#[derive(Debug)]
struct ParameterInner {
    name: Option<String>,
    value: Cell<f64>,
}

impl Parameter {
    /// An anonymous parameter, described by its value.
    pub fn new(value: f64) -> Self {
        Self(Rc::new(ParameterInner {
            name: None,
            value: Cell::new(value),
        }))
    }

    /// A parameter described by `name` in expression descriptions.
    pub fn named(name: impl Into<String>, value: f64) -> Self {
        Self(Rc::new(ParameterInner {
            name: Some(name.into()),
            value: Cell::new(value),
        }))
    }

    /// The name given at construction, if any.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// The current value.
    #[inline]
    pub fn value(&self) -> f64 {
        self.0.value.get()
    }

    /// Assign a new value.
    /// Every expression referring to this parameter sees it on its next evaluation.
    #[inline]
    pub fn set(&self, value: f64) {
        self.0.value.set(value);
    }

    /// Update the value with a function of the current value.
    #[inline]
    pub fn update(&self, f: impl FnOnce(f64) -> f64) {
        self.set(f(self.value()));
    }

    /// Whether two handles refer to the same parameter.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The current value broadcast to every point of `target`.
    pub fn evaluate<'a>(
        &self,
        target: impl Into<Target<'a>>,
    ) -> Result<na::DVector<f64>, FnError> {
        let target: Target = target.into();
        Ok(na::DVector::from_element(target.len(), self.value()))
    }

    /// The gradient of a parameter, which is zero.
    pub fn fn_gradient(&self, dir: usize) -> Result<Expr, FnError> {
        Axis::try_from(dir).map_err(FnError::InvalidDirection)?;
        Ok(Expr::zero())
    }

    /// The name of the parameter, or its value if it has none.
    pub fn description(&self) -> String {
        match &self.0.name {
            Some(name) => name.clone(),
            None => format!("{:?}", self.value()),
        }
    }

    /// Raise to the power of `exponent`.
    pub fn pow(&self, exponent: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Pow, self, exponent)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

//
// expressions
//

/// Elementwise functions of one operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Exp,
    Ln,
    Log10,
    Sqrt,
    Abs,
}

impl UnaryOp {
    #[inline]
    fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tan => x.tan(),
            UnaryOp::Asin => x.asin(),
            UnaryOp::Acos => x.acos(),
            UnaryOp::Atan => x.atan(),
            UnaryOp::Sinh => x.sinh(),
            UnaryOp::Cosh => x.cosh(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Asinh => x.asinh(),
            UnaryOp::Acosh => x.acosh(),
            UnaryOp::Atanh => x.atanh(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Ln => x.ln(),
            UnaryOp::Log10 => x.log10(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Abs => x.abs(),
        }
    }

    /// Name used in descriptions.
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Asin => "asin",
            UnaryOp::Acos => "acos",
            UnaryOp::Atan => "atan",
            UnaryOp::Sinh => "sinh",
            UnaryOp::Cosh => "cosh",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Asinh => "asinh",
            UnaryOp::Acosh => "acosh",
            UnaryOp::Atanh => "atanh",
            UnaryOp::Exp => "exp",
            UnaryOp::Ln => "ln",
            UnaryOp::Log10 => "log10",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Abs => "abs",
        }
    }
}

/// Elementwise functions of two operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
}

impl BinaryOp {
    #[inline]
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Min => a.min(b),
        }
    }

    /// Operator symbol or function name used in descriptions.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
        }
    }
}

/// A lazy function.
///
/// Build these from [`Parameter`]s, [`MeshVariable`]s and plain numbers
/// with the arithmetic operators, the functions in [`math`] and [`misc`],
/// and [`fn_gradient`][Self::fn_gradient].
/// Subexpressions are shared, so cloning is cheap.
#[derive(Clone, Debug)]
pub enum Expr {
    /// A scalar parameter, constant in space.
    Parameter(Parameter),
    /// Nodal data of a mesh variable.
    Variable(MeshVariable),
    /// One coordinate of each evaluation point.
    Coord(Axis),
    /// Elementwise function of one operand.
    Unary(UnaryOp, Rc<Expr>),
    /// Elementwise function of two operands.
    Binary(BinaryOp, Rc<Expr>, Rc<Expr>),
    /// `then` where `selector` is non-negative, `otherwise` elsewhere.
    Where {
        /// Evaluated first to pick a branch per point.
        selector: Rc<Expr>,
        /// Value where the selector is zero or positive.
        then: Rc<Expr>,
        /// Value where the selector is negative or NaN.
        otherwise: Rc<Expr>,
    },
    /// Numerical derivative of `operand` along `axis`,
    /// computed on the points of `mesh`.
    Gradient {
        /// The expression being differentiated.
        operand: Rc<Expr>,
        /// Direction of the derivative.
        axis: Axis,
        /// Mesh whose derivative operator is used.
        mesh: Rc<dyn Mesh>,
    },
}

impl Expr {
    /// An expression that is zero everywhere.
    pub fn zero() -> Self {
        Expr::Parameter(Parameter::new(0.0))
    }

    pub(crate) fn unary(op: UnaryOp, x: impl Into<Expr>) -> Self {
        Expr::Unary(op, Rc::new(x.into()))
    }

    pub(crate) fn binary(op: BinaryOp, a: impl Into<Expr>, b: impl Into<Expr>) -> Self {
        Expr::Binary(op, Rc::new(a.into()), Rc::new(b.into()))
    }

    /// Raise to the power of `exponent`.
    pub fn pow(&self, exponent: impl Into<Expr>) -> Expr {
        Expr::binary(BinaryOp::Pow, self, exponent)
    }

    /// Evaluate the expression at every point of `target`.
    ///
    /// Variables are read as they are at the time of the call.
    /// Floating-point exceptions such as division by zero
    /// produce infinities and NaNs rather than errors.
    pub fn evaluate<'a>(
        &self,
        target: impl Into<Target<'a>>,
    ) -> Result<na::DVector<f64>, FnError> {
        self.eval(&target.into())
    }

    fn eval(&self, target: &Target) -> Result<na::DVector<f64>, FnError> {
        log::trace!("evaluating `{}` at {} points", self, target.len());
        match self {
            Expr::Parameter(p) => Ok(na::DVector::from_element(target.len(), p.value())),
            Expr::Variable(var) => var.eval(target),
            Expr::Coord(axis) => Ok(na::DVector::from_iterator(
                target.len(),
                target.coords().iter().map(|c| c[axis.index()]),
            )),
            Expr::Unary(op, x) => Ok(x.eval(target)?.map(|v| op.apply(v))),
            Expr::Binary(op, a, b) => {
                let a = a.eval(target)?;
                let b = b.eval(target)?;
                check_shape(&a, &b)?;
                Ok(a.zip_map(&b, |a, b| op.apply(a, b)))
            }
            Expr::Where {
                selector,
                then,
                otherwise,
            } => {
                let s = selector.eval(target)?;
                let t = then.eval(target)?;
                let o = otherwise.eval(target)?;
                check_shape(&s, &t)?;
                check_shape(&s, &o)?;
                Ok(na::DVector::from_iterator(
                    s.len(),
                    s.iter()
                        .zip(t.iter().zip(o.iter()))
                        .map(|(&s, (&t, &o))| if s >= 0.0 { t } else { o }),
                ))
            }
            Expr::Gradient {
                operand,
                axis,
                mesh,
            } => {
                let nodal = operand.eval(&Target::Mesh(&**mesh))?;
                let derivative = mesh.derivative(&nodal, *axis)?;
                target.resample(&**mesh, &derivative)
            }
        }
    }

    /// A lazy function for the partial derivative along direction `dir`,
    /// 0 for the first native axis and 1 for the second.
    ///
    /// The derivative is computed numerically on the mesh
    /// of the first mesh variable found in the expression.
    /// Spatially invariant expressions have a zero gradient,
    /// and the gradient of a [`Where`][Expr::Where] node
    /// selects between the gradients of its branches,
    /// treating the selection as locally constant.
    /// A branch referring to no mesh is differentiated on the mesh of the node.
    ///
    /// Expressions that vary in space but refer to no mesh,
    /// such as `sin(coord(X))`, can't be differentiated this way;
    /// use [`derivative_on`][Self::derivative_on] for those.
    pub fn fn_gradient(&self, dir: usize) -> Result<Expr, FnError> {
        let axis = Axis::try_from(dir).map_err(FnError::InvalidDirection)?;
        self.gradient_along(axis)
    }

    fn gradient_along(&self, axis: Axis) -> Result<Expr, FnError> {
        self.gradient_within(axis, None)
    }

    /// `outer` is the mesh of the enclosing `Where` node,
    /// used for branches that refer to no mesh of their own.
    fn gradient_within(
        &self,
        axis: Axis,
        outer: Option<&Rc<dyn Mesh>>,
    ) -> Result<Expr, FnError> {
        if self.is_spatially_invariant() {
            return Ok(Expr::zero());
        }
        let mesh = self.first_mesh().or_else(|| outer.cloned());
        match (self, mesh) {
            (
                Expr::Where {
                    selector,
                    then,
                    otherwise,
                },
                mesh,
            ) => Ok(Expr::Where {
                selector: Rc::clone(selector),
                then: Rc::new(then.gradient_within(axis, mesh.as_ref())?),
                otherwise: Rc::new(otherwise.gradient_within(axis, mesh.as_ref())?),
            }),
            (_, Some(mesh)) => Ok(self.derivative_on(mesh, axis)),
            (_, None) => Err(FnError::Unsupported(format!(
                "no mesh to differentiate `{self}` on"
            ))),
        }
    }

    /// A lazy function for the numerical derivative of this expression
    /// along `axis`, computed on the points of `mesh`.
    pub fn derivative_on(&self, mesh: Rc<dyn Mesh>, axis: Axis) -> Expr {
        Expr::Gradient {
            operand: Rc::new(self.clone()),
            axis,
            mesh,
        }
    }

    /// Whether the expression has the same value everywhere,
    /// i.e. refers to no variables or coordinates.
    pub fn is_spatially_invariant(&self) -> bool {
        match self {
            Expr::Parameter(_) => true,
            Expr::Variable(_) | Expr::Coord(_) | Expr::Gradient { .. } => false,
            Expr::Unary(_, x) => x.is_spatially_invariant(),
            Expr::Binary(_, a, b) => a.is_spatially_invariant() && b.is_spatially_invariant(),
            Expr::Where {
                selector,
                then,
                otherwise,
            } => {
                selector.is_spatially_invariant()
                    && then.is_spatially_invariant()
                    && otherwise.is_spatially_invariant()
            }
        }
    }

    fn visit_meshes<F: FnMut(&Rc<dyn Mesh>)>(&self, f: &mut F) {
        match self {
            Expr::Parameter(_) | Expr::Coord(_) => {}
            Expr::Variable(var) => f(var.mesh()),
            Expr::Unary(_, x) => x.visit_meshes(f),
            Expr::Binary(_, a, b) => {
                a.visit_meshes(f);
                b.visit_meshes(f);
            }
            Expr::Where {
                selector,
                then,
                otherwise,
            } => {
                selector.visit_meshes(f);
                then.visit_meshes(f);
                otherwise.visit_meshes(f);
            }
            Expr::Gradient { operand, mesh, .. } => {
                f(mesh);
                operand.visit_meshes(f);
            }
        }
    }

    fn first_mesh(&self) -> Option<Rc<dyn Mesh>> {
        let mut first = None;
        self.visit_meshes(&mut |mesh| {
            first.get_or_insert_with(|| Rc::clone(mesh));
        });
        first
    }

    /// Check that every variable in the expression lives on the same mesh.
    ///
    /// Evaluation itself doesn't require this:
    /// variables on other meshes than the target are interpolated,
    /// which is occasionally useful for moving data between meshes.
    pub fn check_single_mesh(&self) -> Result<(), FnError> {
        let mut first: Option<MeshId> = None;
        let mut mixed = false;
        self.visit_meshes(&mut |mesh| match first {
            None => first = Some(mesh.id()),
            Some(id) => mixed |= id != mesh.id(),
        });
        if mixed {
            return Err(FnError::MeshMismatch);
        }
        Ok(())
    }

    /// Human-readable form of the expression, built from its operands' descriptions.
    pub fn description(&self) -> String {
        match self {
            Expr::Parameter(p) => p.description(),
            Expr::Variable(var) => var.description(),
            Expr::Coord(axis) => axis_symbol(*axis).to_string(),
            Expr::Unary(UnaryOp::Neg, x) => format!("-{}", x.description()),
            Expr::Unary(op, x) => format!("{}({})", op.name(), x.description()),
            Expr::Binary(op @ (BinaryOp::Max | BinaryOp::Min), a, b) => {
                format!("{}({}, {})", op.symbol(), a.description(), b.description())
            }
            Expr::Binary(BinaryOp::Pow, a, b) => {
                format!("({})^({})", a.description(), b.description())
            }
            Expr::Binary(op, a, b) => {
                format!("({} {} {})", a.description(), op.symbol(), b.description())
            }
            Expr::Where {
                selector,
                then,
                otherwise,
            } => format!(
                "where({} >= 0, {}, {})",
                selector.description(),
                then.description(),
                otherwise.description()
            ),
            Expr::Gradient {
                operand,
                axis,
                mesh,
            } => format!(
                "d({})/d{}",
                operand.description(),
                mesh.axis_names()[axis.index()]
            ),
        }
    }
}

fn axis_symbol(axis: Axis) -> &'static str {
    match axis {
        Axis::X => "X",
        Axis::Y => "Y",
    }
}

fn check_shape(a: &na::DVector<f64>, b: &na::DVector<f64>) -> Result<(), FnError> {
    if a.len() != b.len() {
        return Err(FnError::ShapeMismatch {
            expected: a.len(),
            found: b.len(),
        });
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

//
// tests
//
