//! Page-side pollers and polling strategies.
//!
//! A wait task installs one poller object in the page per attempt. The
//! poller re-evaluates the predicate on every animation frame, on DOM
//! mutation, or on a fixed interval, and resolves with the first truthy
//! value.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::LocalValue;

// ============================================================================
// Polling
// ============================================================================

/// When a predicate is re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polling {
    /// Every animation frame.
    #[default]
    Raf,
    /// On DOM mutation under the root node.
    Mutation,
    /// At a fixed interval.
    Interval(Duration),
}

impl Polling {
    /// Polls every `ms` milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for zero.
    pub fn interval(ms: u64) -> Result<Self> {
        if ms == 0 {
            return Err(Error::invalid_argument(
                "Cannot poll with non-positive interval",
            ));
        }
        Ok(Self::Interval(Duration::from_millis(ms)))
    }

    /// Returns the argument passed to the poller factory.
    #[must_use]
    pub fn to_local_value(&self) -> LocalValue {
        match self {
            Self::Raf => LocalValue::from("raf"),
            Self::Mutation => LocalValue::from("mutation"),
            Self::Interval(interval) => LocalValue::Number(interval.as_millis() as f64),
        }
    }
}

impl fmt::Display for Polling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raf => f.write_str("raf"),
            Self::Mutation => f.write_str("mutation"),
            Self::Interval(interval) => write!(f, "{}", interval.as_millis()),
        }
    }
}

impl FromStr for Polling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "raf" => Ok(Self::Raf),
            "mutation" => Ok(Self::Mutation),
            other => {
                let ms: i64 = other.parse().map_err(|_| {
                    Error::invalid_argument(format!("Unknown polling option: {other}"))
                })?;
                if ms <= 0 {
                    return Err(Error::invalid_argument(
                        "Cannot poll with non-positive interval",
                    ));
                }
                Self::interval(ms as u64)
            }
        }
    }
}

// ============================================================================
// Page Scripts
// ============================================================================

/// Expression evaluating to the utility object installed once per realm.
pub(crate) const POLLER_SOURCE: &str = r#"(() => {
  class Deferred {
    constructor() {
      this.settled = false;
      this.promise = new Promise((resolve, reject) => {
        this.resolveFn = resolve;
        this.rejectFn = reject;
      });
    }
    resolve(value) {
      if (this.settled) return;
      this.settled = true;
      this.resolveFn(value);
    }
    reject(error) {
      if (this.settled) return;
      this.settled = true;
      this.rejectFn(error);
    }
  }

  // Expressions are re-evaluated on every check.
  const createFunction = source =>
    new Function(
      '...args',
      `const value = (${source});\n` +
        `return typeof value === 'function' ? value(...args) : value;`
    );

  class RAFPoller {
    constructor(fn) {
      this.fn = fn;
      this.deferred = null;
    }
    async start() {
      const deferred = (this.deferred = new Deferred());
      const value = await this.fn();
      if (value) {
        deferred.resolve(value);
        return;
      }
      const poll = async () => {
        if (deferred.settled) return;
        try {
          const value = await this.fn();
          if (value) {
            deferred.resolve(value);
            return;
          }
        } catch (error) {
          deferred.reject(error);
          return;
        }
        requestAnimationFrame(poll);
      };
      requestAnimationFrame(poll);
    }
    async stop() {
      if (!this.deferred) return;
      this.deferred.reject(new Error('Poller stopped'));
    }
    result() {
      if (!this.deferred) throw new Error('Polling never started');
      return this.deferred.promise;
    }
  }

  class MutationPoller {
    constructor(fn, root) {
      this.fn = fn;
      this.root = root;
      this.observer = null;
      this.deferred = null;
    }
    async start() {
      const deferred = (this.deferred = new Deferred());
      const value = await this.fn();
      if (value) {
        deferred.resolve(value);
        return;
      }
      this.observer = new MutationObserver(async () => {
        try {
          const value = await this.fn();
          if (!value) return;
          deferred.resolve(value);
        } catch (error) {
          deferred.reject(error);
        }
        await this.stop();
      });
      this.observer.observe(this.root, {
        childList: true,
        subtree: true,
        attributes: true,
      });
    }
    async stop() {
      if (this.deferred) this.deferred.reject(new Error('Poller stopped'));
      if (this.observer) {
        this.observer.disconnect();
        this.observer = null;
      }
    }
    result() {
      if (!this.deferred) throw new Error('Polling never started');
      return this.deferred.promise;
    }
  }

  class IntervalPoller {
    constructor(fn, ms) {
      this.fn = fn;
      this.ms = ms;
      this.interval = null;
      this.deferred = null;
    }
    async start() {
      const deferred = (this.deferred = new Deferred());
      const value = await this.fn();
      if (value) {
        deferred.resolve(value);
        return;
      }
      this.interval = setInterval(async () => {
        try {
          const value = await this.fn();
          if (!value) return;
          deferred.resolve(value);
        } catch (error) {
          deferred.reject(error);
        }
        await this.stop();
      }, this.ms);
    }
    async stop() {
      if (this.deferred) this.deferred.reject(new Error('Poller stopped'));
      if (this.interval !== null) {
        clearInterval(this.interval);
        this.interval = null;
      }
    }
    result() {
      if (!this.deferred) throw new Error('Polling never started');
      return this.deferred.promise;
    }
  }

  return { createFunction, RAFPoller, MutationPoller, IntervalPoller };
})()"#;

/// Builds a poller from `(utility, root, source, polling, ...args)`.
pub(crate) const CREATE_POLLER: &str = r#"(utility, root, source, polling, ...args) => {
  const predicate = utility.createFunction(source);
  const fn = () => predicate(...args);
  if (polling === 'raf') {
    return new utility.RAFPoller(fn);
  }
  if (polling === 'mutation') {
    return new utility.MutationPoller(fn, root || document);
  }
  return new utility.IntervalPoller(fn, polling);
}"#;

/// Starts a poller and resolves with its result.
pub(crate) const AWAIT_POLLER: &str = r#"async poller => {
  void poller.start();
  return await poller.result();
}"#;

/// Stops a poller.
pub(crate) const STOP_POLLER: &str = r#"async poller => {
  await poller.stop();
}"#;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_polling() {
        assert_eq!("raf".parse::<Polling>().unwrap(), Polling::Raf);
        assert_eq!("mutation".parse::<Polling>().unwrap(), Polling::Mutation);
        assert_eq!(
            "250".parse::<Polling>().unwrap(),
            Polling::Interval(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_non_positive_interval_rejected() {
        assert!(matches!(
            "0".parse::<Polling>(),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            "-5".parse::<Polling>(),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(Polling::interval(0).is_err());
        assert!("sometimes".parse::<Polling>().is_err());
    }

    #[test]
    fn test_local_value() {
        assert_eq!(Polling::Raf.to_local_value().to_wire()["value"], "raf");
        let interval = Polling::interval(100).unwrap().to_local_value().to_wire();
        assert_eq!(interval["type"], "number");
        assert_eq!(interval["value"], 100.0);
    }

    #[test]
    fn test_scripts_expose_pollers() {
        for name in ["RAFPoller", "MutationPoller", "IntervalPoller", "createFunction"] {
            assert!(POLLER_SOURCE.contains(name), "{name}");
        }
        assert!(CREATE_POLLER.contains("utility.createFunction"));
    }
}
