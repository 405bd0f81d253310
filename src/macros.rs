#![allow(unused_macros)]

/// Helper macro for locking the registry-wide mutex
///
/// A poisoned lock is reported as [`crate::Error::LockError`] to the enclosing function.
///
/// ```rust, ignore
///  let _guard = lock!(self.lock);
///  self.chains.push(Some(chain));
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for reading a record
///
/// ```rust, ignore
///  let ctx = read_lock!(record);
///  println!("{}", ctx.program_name);
/// ```
macro_rules! read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for writing to a record
///
/// ```rust, ignore
///  let mut ctx = write_lock!(record);
///  ctx.ticks += 1;
/// ```
macro_rules! write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for reading a single value out of a record
///
/// ```rust, ignore
///  let id = with_read!(record, |ctx: &ExecutionContext| ctx.program_id);
/// ```
macro_rules! with_read {
    ($arc_rwlock:expr, $closure:expr) => {{
        let guard = $arc_rwlock.read().map_err(|_| crate::Error::LockError)?;
        $closure(&*guard)
    }};
}

/// Helper macro for a short write to a record
///
/// ```rust, ignore
///  with_write!(master, |ctx: &mut ExecutionContext| ctx.init_cycle = true);
/// ```
macro_rules! with_write {
    ($arc_rwlock:expr, $closure:expr) => {{
        let mut guard = $arc_rwlock.write().map_err(|_| crate::Error::LockError)?;
        $closure(&mut *guard)
    }};
}
