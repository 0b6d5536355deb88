//! Scalar fields with one value per mesh point.

use fixedbitset as fb;
use nalgebra as na;

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use crate::{
    function::{Expr, FnError, Target},
    mesh::{Axis, Mesh},
    parallel::{ShadowExchange, SyncError, SyncMode},
    Vec2,
};

type WriteHook = Box<dyn Fn(&MeshVariable)>;

/// A named scalar field living on a mesh.
///
/// The data can only be replaced as a whole
/// (with [`set_data`][Self::set_data], [`assign`][Self::assign] or [`sync`][Self::sync]),
/// never modified in place.
/// Readers hold on to a snapshot,
/// so a lazy function being evaluated sees either the old or the new data, never a mix.
///
/// Clones are handles to the same variable.
#[derive(Clone)]
pub struct MeshVariable(Rc<VariableInner>);

struct VariableInner {
    name: String,
    /// short name used in descriptions
    label: RefCell<Option<String>>,
    mesh: Rc<dyn Mesh>,
    data: RefCell<Rc<na::DVector<f64>>>,
    locked: Cell<bool>,
    on_write: RefCell<Vec<WriteHook>>,
    /// set while write hooks are running
    in_hooks: Cell<bool>,
}

impl MeshVariable {
    /// Create a variable on `mesh`, initialized to zero.
    pub fn new(name: impl Into<String>, mesh: Rc<dyn Mesh>) -> Self {
        let data = na::DVector::zeros(mesh.point_count());
        Self(Rc::new(VariableInner {
            name: name.into(),
            label: RefCell::new(None),
            mesh,
            data: RefCell::new(Rc::new(data)),
            locked: Cell::new(false),
            on_write: RefCell::new(Vec::new()),
            in_hooks: Cell::new(false),
        }))
    }

    /// Set a short name to use in descriptions of lazy functions instead of the full name.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        *self.0.label.borrow_mut() = Some(label.into());
        self
    }

    /// A new unlocked variable on the same mesh with a copy of this one's data.
    pub fn copy(&self, name: impl Into<String>) -> Self {
        let copy = Self::new(name, Rc::clone(&self.0.mesh));
        *copy.0.data.borrow_mut() = self.data();
        copy
    }

    /// Full name of the variable.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The mesh the variable lives on.
    #[inline]
    pub fn mesh(&self) -> &Rc<dyn Mesh> {
        &self.0.mesh
    }

    /// A snapshot of the current data.
    ///
    /// The snapshot is unaffected by later writes to the variable.
    #[inline]
    pub fn data(&self) -> Rc<na::DVector<f64>> {
        Rc::clone(&self.0.data.borrow())
    }

    /// Replace the data of the variable.
    ///
    /// Fails without modifying anything
    /// if the variable is locked or `values` has the wrong length.
    /// Write hooks run after the data has been replaced.
    pub fn set_data(&self, values: na::DVector<f64>) -> Result<(), FnError> {
        if self.is_locked() {
            return Err(FnError::LockedVariable {
                name: self.0.name.clone(),
            });
        }
        self.check_len(values.len())?;
        self.replace(values);
        Ok(())
    }

    /// Evaluate `f` on the mesh of this variable and store the result as its data.
    pub fn assign(&self, f: impl Into<Expr>) -> Result<(), FnError> {
        let f: Expr = f.into();
        let values = f.evaluate(&*self.0.mesh)?;
        self.set_data(values)
    }

    fn check_len(&self, len: usize) -> Result<(), FnError> {
        let expected = self.0.mesh.point_count();
        if len != expected {
            return Err(FnError::ShapeMismatch {
                expected,
                found: len,
            });
        }
        Ok(())
    }

    fn replace(&self, values: na::DVector<f64>) {
        *self.0.data.borrow_mut() = Rc::new(values);
        log::debug!("replaced data of mesh variable `{}`", self.0.name);
        if self.0.in_hooks.replace(true) {
            log::trace!(
                "write hook replaced the data of `{}`, not running hooks again",
                self.0.name
            );
            return;
        }
        for hook in self.0.on_write.borrow().iter() {
            hook(self);
        }
        self.0.in_hooks.set(false);
    }

    /// Register a function to run after every replacement of the data,
    /// e.g. for rebuilding quantities derived from it.
    ///
    /// A hook may write to the variable it is registered on,
    /// but that write doesn't run the hooks again.
    /// Hooks must not register further hooks on the same variable.
    pub fn on_write(&self, hook: impl Fn(&MeshVariable) + 'static) {
        self.0.on_write.borrow_mut().push(Box::new(hook));
    }

    /// Make the variable read-only.
    #[inline]
    pub fn lock(&self) {
        self.0.locked.set(true);
    }

    /// Make the variable writable again.
    #[inline]
    pub fn unlock(&self) {
        self.0.locked.set(false);
    }

    /// Whether writes are currently rejected.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.0.locked.get()
    }

    /// Whether two handles refer to the same variable.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Reconcile values in the shadow zone with other workers.
    ///
    /// Every worker must call this for the same variables in the same order.
    /// Locking doesn't prevent synchronization,
    /// since it only brings shared points in line with their owners.
    pub fn sync(&self, exchange: &dyn ShadowExchange, mode: SyncMode) -> Result<(), FnError> {
        let values = exchange.exchange(&self.data(), mode)?;
        let expected = self.0.mesh.point_count();
        if values.len() != expected {
            return Err(SyncError::LengthChanged {
                expected,
                found: values.len(),
            }
            .into());
        }
        log::debug!(
            "synchronized mesh variable `{}` on worker {} ({mode:?})",
            self.0.name,
            exchange.context().rank()
        );
        self.replace(values);
        Ok(())
    }

    /// Interpolate the data at arbitrary points.
    pub fn interpolate(&self, points: &[Vec2]) -> Result<na::DVector<f64>, FnError> {
        Ok(self.0.mesh.interpolate(&self.data(), points)?)
    }

    /// Interpolate the data at arbitrary points
    /// and mark the ones outside the mesh, whose values were extrapolated.
    pub fn interpolate_flagged(
        &self,
        points: &[Vec2],
    ) -> Result<(na::DVector<f64>, fb::FixedBitSet), FnError> {
        Ok(self.0.mesh.interpolate_flagged(&self.data(), points)?)
    }

    /// Nodal derivatives of the data along both axes.
    pub fn gradient(&self) -> Result<(na::DVector<f64>, na::DVector<f64>), FnError> {
        let data = self.data();
        Ok((
            self.0.mesh.derivative(&data, Axis::X)?,
            self.0.mesh.derivative(&data, Axis::Y)?,
        ))
    }

    /// Evaluate the variable at `target`.
    ///
    /// On the variable's own mesh the data is returned exactly;
    /// anywhere else it is interpolated.
    pub fn evaluate<'a>(
        &self,
        target: impl Into<Target<'a>>,
    ) -> Result<na::DVector<f64>, FnError> {
        self.eval(&target.into())
    }

    pub(crate) fn eval(&self, target: &Target) -> Result<na::DVector<f64>, FnError> {
        let data = self.data();
        if target.mesh_id() == Some(self.0.mesh.id()) {
            return Ok((*data).clone());
        }
        self.interpolate(target.coords())
    }

    /// A lazy function for the derivative along direction `dir`.
    /// See [`Expr::fn_gradient`].
    pub fn fn_gradient(&self, dir: usize) -> Result<Expr, FnError> {
        Expr::from(self).fn_gradient(dir)
    }

    /// Raise to the power of `exponent`.
    pub fn pow(&self, exponent: impl Into<Expr>) -> Expr {
        Expr::from(self).pow(exponent)
    }

    /// The label if one was set, otherwise the name.
    pub fn description(&self) -> String {
        self.0
            .label
            .borrow()
            .clone()
            .unwrap_or_else(|| self.0.name.clone())
    }
}

impl fmt::Display for MeshVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = if self.is_locked() { "RO" } else { "RW" };
        write!(f, "MeshVariable: {} ({access})", self.0.name)
    }
}

impl fmt::Debug for MeshVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshVariable")
            .field("name", &self.0.name)
            .field("label", &self.0.label.borrow())
            .field("mesh", &self.0.mesh.id())
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

//
// tests
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mesh::{tiny_mesh_2d, unit_square},
        parallel::{SerialExchange, WorkerContext},
    };
    use approx::assert_relative_eq;

    #[test]
    fn locked_variables_reject_writes() {
        let mesh = tiny_mesh_2d().into_shared();
        let h = MeshVariable::new("height", mesh);
        h.set_data(na::DVector::from_element(7, 1.0)).unwrap();
        h.lock();
        assert_eq!(h.to_string(), "MeshVariable: height (RO)");

        let err = h.set_data(na::DVector::from_element(7, 2.0)).unwrap_err();
        assert!(matches!(err, FnError::LockedVariable { ref name } if name == "height"));
        assert!(matches!(h.assign(5.0), Err(FnError::LockedVariable { .. })));
        assert_eq!(*h.data(), na::DVector::from_element(7, 1.0));

        h.unlock();
        assert_eq!(h.to_string(), "MeshVariable: height (RW)");
        h.assign(5.0).unwrap();
        assert_eq!(*h.data(), na::DVector::from_element(7, 5.0));
    }

    #[test]
    fn wrong_length_is_rejected() {
        let h = MeshVariable::new("h", tiny_mesh_2d().into_shared());
        assert!(matches!(
            h.set_data(na::DVector::zeros(3)),
            Err(FnError::ShapeMismatch {
                expected: 7,
                found: 3
            })
        ));
        assert_eq!(*h.data(), na::DVector::zeros(7));
    }

    #[test]
    fn snapshots_are_not_affected_by_writes() {
        let h = MeshVariable::new("h", tiny_mesh_2d().into_shared());
        let before = h.data();
        h.set_data(na::DVector::from_element(7, 3.0)).unwrap();
        assert_eq!(*before, na::DVector::zeros(7));
        assert_eq!(h.data()[0], 3.0);

        // clones are handles, copies are not
        let handle = h.clone();
        let copy = h.copy("h2");
        h.set_data(na::DVector::from_element(7, 4.0)).unwrap();
        assert!(handle.ptr_eq(&h));
        assert_eq!(handle.data()[0], 4.0);
        assert_eq!(copy.data()[0], 3.0);
    }

    #[test]
    fn write_hooks_run_after_replacement() {
        let mesh = tiny_mesh_2d().into_shared();
        let h = MeshVariable::new("h", mesh.clone());
        let slope = MeshVariable::new("slope", mesh);
        let target = slope.clone();
        h.on_write(move |h| {
            let (dx, _) = h.gradient().unwrap();
            target.set_data(dx).unwrap();
        });

        h.assign(crate::function::misc::coord(Axis::X) * 2.0).unwrap();
        for v in slope.data().iter() {
            assert_relative_eq!(*v, 2.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn hooks_may_write_their_own_variable() {
        let h = MeshVariable::new("h", tiny_mesh_2d().into_shared());
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        h.on_write(move |h| {
            counter.set(counter.get() + 1);
            h.set_data(h.data().map(|v| v.max(0.0))).unwrap();
        });

        h.assign(crate::function::misc::coord(Axis::X)).unwrap();
        assert_eq!(calls.get(), 1);
        assert!(h.data().iter().all(|&v| v >= 0.0));
        assert!(h.data().iter().any(|&v| v > 0.0));

        // hooks still run on the next outside write
        h.set_data(na::DVector::from_element(7, -1.0)).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(*h.data(), na::DVector::zeros(7));
    }

    #[test]
    fn interpolation_and_nodal_gradient() {
        let mesh = unit_square(5).into_shared();
        let h = MeshVariable::new("h", mesh.clone());
        h.assign(crate::function::misc::coord(Axis::Y) * 4.0 - 1.0)
            .unwrap();
        let at = h.interpolate(&[Vec2::new(0.3, 0.6)]).unwrap();
        assert_relative_eq!(at[0], 1.4, epsilon = 1e-12);

        let (at, outside) = h
            .interpolate_flagged(&[Vec2::new(0.3, 0.6), Vec2::new(0.5, 1.25)])
            .unwrap();
        assert_eq!(outside.ones().collect::<Vec<_>>(), vec![1]);
        assert_relative_eq!(at[1], 4.0, epsilon = 1e-12);

        let (dx, dy) = h.gradient().unwrap();
        for i in 0..mesh.point_count() {
            assert_relative_eq!(dx[i], 0.0, epsilon = 1e-10);
            assert_relative_eq!(dy[i], 4.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn descriptions_prefer_the_label() {
        let mesh = tiny_mesh_2d().into_shared();
        let h = MeshVariable::new("surface height", mesh.clone());
        assert_eq!(h.description(), "surface height");
        let h = h.with_label("h");
        assert_eq!(h.description(), "h");
        assert_eq!(h.fn_gradient(1).unwrap().description(), "d(h)/dY");
        assert_eq!(h.name(), "surface height");
    }

    /// Doubles every value, like a merge where each point is shared by two workers.
    struct Doubling;

    impl ShadowExchange for Doubling {
        fn context(&self) -> WorkerContext {
            WorkerContext::new(1, 2).unwrap()
        }

        fn exchange(
            &self,
            values: &na::DVector<f64>,
            mode: SyncMode,
        ) -> Result<na::DVector<f64>, SyncError> {
            match mode {
                SyncMode::Merge => Ok(values * 2.0),
                SyncMode::Replace => Ok(values.rows(0, 1).into_owned()),
            }
        }
    }

    #[test]
    fn sync_replaces_data_through_the_exchange() {
        let h = MeshVariable::new("h", tiny_mesh_2d().into_shared());
        h.set_data(na::DVector::from_element(7, 1.5)).unwrap();
        h.lock();

        h.sync(&SerialExchange, SyncMode::Replace).unwrap();
        assert_eq!(*h.data(), na::DVector::from_element(7, 1.5));

        h.sync(&Doubling, SyncMode::Merge).unwrap();
        assert_eq!(*h.data(), na::DVector::from_element(7, 3.0));

        assert!(matches!(
            h.sync(&Doubling, SyncMode::Replace),
            Err(FnError::Sync(SyncError::LengthChanged {
                expected: 7,
                found: 1
            }))
        ));
        assert_eq!(*h.data(), na::DVector::from_element(7, 3.0));
    }
}
