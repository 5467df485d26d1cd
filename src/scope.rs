//! Ambient formatting locale with scoped, guaranteed restoration.
//!
//! The ambient locale is thread-confined: each thread sees its own value, so
//! concurrent generations on different threads cannot observe each other's
//! scopes. A scope must be dropped on the thread that entered it, which is
//! why [`LocaleScope`] is neither `Send` nor `Sync`. Formatting code inside
//! this crate always receives the locale explicitly; the ambient value only
//! supplies the default for callers that do not configure one.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::locale::Locale;

thread_local! {
    static AMBIENT: RefCell<Locale> = RefCell::new(Locale::invariant());
}

pub fn current_locale() -> Locale {
    AMBIENT.with(|cell| cell.borrow().clone())
}

/// Restores the previously active locale when dropped, including during
/// unwinding and early `?` returns.
#[must_use = "the previous locale is restored as soon as the scope is dropped"]
pub struct LocaleScope {
    previous: Option<Locale>,
    _not_send: PhantomData<*const ()>,
}

impl LocaleScope {
    /// `None` enters a no-op scope that restores nothing.
    pub fn enter(locale: Option<Locale>) -> Self {
        let previous = locale.map(|next| {
            tracing::trace!(locale = next.tag(), "entering locale scope");
            AMBIENT.with(|cell| cell.replace(next))
        });
        Self {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Locale active inside this scope.
    pub fn locale(&self) -> Locale {
        current_locale()
    }

    pub fn exit(self) {
        drop(self);
    }
}

impl Drop for LocaleScope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            tracing::trace!(locale = previous.tag(), "restoring locale");
            AMBIENT.with(|cell| {
                cell.replace(previous);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_previous_locale_on_exit() {
        let outer = LocaleScope::enter(Some(Locale::en_gb()));
        {
            let inner = LocaleScope::enter(Some(Locale::de_de()));
            assert_eq!(inner.locale().tag(), "de-DE");
            inner.exit();
        }
        assert_eq!(current_locale().tag(), "en-GB");
        drop(outer);
        assert_eq!(current_locale(), Locale::invariant());
    }

    #[test]
    fn absent_locale_is_a_no_op_scope() {
        let _outer = LocaleScope::enter(Some(Locale::fr_fr()));
        let scope = LocaleScope::enter(None);
        assert_eq!(scope.locale().tag(), "fr-FR");
        scope.exit();
        assert_eq!(current_locale().tag(), "fr-FR");
    }

    #[test]
    fn restores_after_error_path() {
        fn failing_work() -> Result<(), String> {
            let _scope = LocaleScope::enter(Some(Locale::it_it()));
            assert_eq!(current_locale().tag(), "it-IT");
            let outcome: Result<(), String> = Err("template exploded".to_string());
            outcome?;
            Ok(())
        }

        assert!(failing_work().is_err());
        assert_eq!(current_locale(), Locale::invariant());
    }

    #[test]
    fn restores_after_panic() {
        let result = std::panic::catch_unwind(|| {
            let _scope = LocaleScope::enter(Some(Locale::nl_nl()));
            panic!("placeholder panicked");
        });
        assert!(result.is_err());
        assert_eq!(current_locale(), Locale::invariant());
    }

    #[test]
    fn scopes_are_thread_confined() {
        let _scope = LocaleScope::enter(Some(Locale::de_de()));
        let seen = std::thread::spawn(|| current_locale().tag().to_string())
            .join()
            .expect("thread");
        assert_eq!(seen, "");
        assert_eq!(current_locale().tag(), "de-DE");
    }
}
