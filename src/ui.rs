//! Interactive prompts for the launch flow.
//!
//! All user interaction goes through the [`Prompt`] trait so the flow can be
//! driven by a scripted implementation in tests; [`Interactive`] is the
//! terminal-backed implementation.

use color_eyre::eyre::{bail, ensure};
use color_eyre::Report;

const NAME_MIN: usize = 4;
const NAME_MAX: usize = 10;

/// The three interactions the launch flow needs from a terminal.
pub trait Prompt {
    /// Ask for a line of free-form text.
    fn input(&mut self, prompt: &str) -> Result<String, Report>;

    /// Ask the user to pick one of `items`; returns the chosen index.
    fn select(&mut self, prompt: &str, items: &[String]) -> Result<usize, Report>;

    /// Ask a yes/no question.
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, Report>;
}

/// Terminal prompts backed by `dialoguer`.
#[derive(Debug, Default)]
pub struct Interactive;

impl Prompt for Interactive {
    fn input(&mut self, prompt: &str) -> Result<String, Report> {
        Ok(dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .interact_text()?)
    }

    fn select(&mut self, prompt: &str, items: &[String]) -> Result<usize, Report> {
        Ok(dialoguer::Select::new()
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()?)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, Report> {
        Ok(dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }
}

/// Check that an application name is between 4 and 10 characters, inclusive.
///
/// The name ends up in keypair, security group, and tag names, so it is kept
/// short.
pub fn valid_app_name(name: &str) -> Result<(), Report> {
    let len = name.chars().count();
    ensure!(
        len >= NAME_MIN && len <= NAME_MAX,
        "application name must be {}-{} characters, got {}",
        NAME_MIN,
        NAME_MAX,
        len
    );
    Ok(())
}

/// Prompt for an application name until a valid one is entered.
pub fn ask_app_name(prompt: &mut dyn Prompt) -> Result<String, Report> {
    loop {
        let name = prompt.input("Application name (4-10 characters)")?;
        let name = name.trim().to_string();
        match valid_app_name(&name) {
            Ok(()) => return Ok(name),
            Err(e) => eprintln!("{}", console::style(e).red()),
        }
    }
}

/// Ask whether an already-existing resource should be reused.
///
/// Declining is fatal: the run terminates before touching the resource any
/// further (in particular, no ingress rules are added to a declined
/// security group).
pub fn confirm_reuse(prompt: &mut dyn Prompt, what: &str, name: &str) -> Result<(), Report> {
    let q = format!("{} '{}' already exists. Reuse it?", what, name);
    if prompt.confirm(&q, false)? {
        Ok(())
    } else {
        bail!("{} '{}' already exists and reuse was declined", what, name)
    }
}

/// Pick one of `items`, labelled by `label`.
///
/// With a single candidate no menu is shown; it is announced and used
/// directly. No candidates at all is fatal.
pub fn choose<T>(
    prompt: &mut dyn Prompt,
    what: &str,
    items: Vec<T>,
    label: impl Fn(&T) -> String,
) -> Result<T, Report> {
    match items.len() {
        0 => bail!("no {} available", what),
        1 => {
            let only = items.into_iter().next().expect("length checked above");
            println!("Using the only available {}: {}", what, label(&only));
            Ok(only)
        }
        _ => {
            let labels: Vec<String> = items.iter().map(|i| label(i)).collect();
            let idx = prompt.select(&format!("Select a {}", what), &labels)?;
            // idx indexes the menu we just built over `items`
            Ok(items.into_iter().nth(idx).expect("selection in range"))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted responses; panics if the flow asks for an interaction the
    /// test did not script.
    #[derive(Default)]
    struct Scripted {
        inputs: VecDeque<String>,
        selections: VecDeque<usize>,
        confirms: VecDeque<bool>,
    }

    impl Prompt for Scripted {
        fn input(&mut self, _: &str) -> Result<String, Report> {
            Ok(self.inputs.pop_front().expect("unscripted input prompt"))
        }

        fn select(&mut self, _: &str, items: &[String]) -> Result<usize, Report> {
            let idx = self.selections.pop_front().expect("unscripted menu");
            assert!(idx < items.len());
            Ok(idx)
        }

        fn confirm(&mut self, _: &str, _: bool) -> Result<bool, Report> {
            Ok(self.confirms.pop_front().expect("unscripted confirmation"))
        }
    }

    #[test]
    fn app_name_bounds() {
        assert!(valid_app_name("abc").is_err());
        assert!(valid_app_name("abcd").is_ok());
        assert!(valid_app_name("abcdefghij").is_ok());
        assert!(valid_app_name("abcdefghijk").is_err());
        assert!(valid_app_name("").is_err());
    }

    #[test]
    fn app_name_reprompts_until_valid() {
        let mut p = Scripted::default();
        p.inputs.push_back("no".to_string());
        p.inputs.push_back("waytoolongname".to_string());
        p.inputs.push_back("  pusher  ".to_string());
        assert_eq!(ask_app_name(&mut p).unwrap(), "pusher");
        assert!(p.inputs.is_empty());
    }

    #[test]
    fn app_name_counts_characters_not_bytes() {
        // four characters, eight bytes
        assert!(valid_app_name("дома").is_ok());
        assert!(valid_app_name("дом").is_err());
    }

    #[test]
    fn declined_reuse_is_fatal() {
        let mut p = Scripted::default();
        p.confirms.push_back(false);
        let err = confirm_reuse(&mut p, "Security group", "chirp-push").unwrap_err();
        assert!(err.to_string().contains("reuse was declined"), "{}", err);
        assert!(p.confirms.is_empty());
    }

    #[test]
    fn confirmed_reuse_continues() {
        let mut p = Scripted::default();
        p.confirms.push_back(true);
        confirm_reuse(&mut p, "Keypair", "chirp-push").unwrap();
    }

    #[test]
    fn choose_single_candidate_shows_no_menu() {
        // Scripted panics on any select() call, so this also asserts that
        // no menu was shown.
        let mut p = Scripted::default();
        let picked = choose(&mut p, "subnet", vec!["subnet-1"], |s| s.to_string()).unwrap();
        assert_eq!(picked, "subnet-1");
    }

    #[test]
    fn choose_empty_is_fatal() {
        let mut p = Scripted::default();
        let err = choose(&mut p, "VPC", Vec::<String>::new(), |s| s.clone()).unwrap_err();
        assert!(err.to_string().contains("no VPC available"), "{}", err);
    }

    #[test]
    fn choose_many_uses_menu() {
        let mut p = Scripted::default();
        p.selections.push_back(1);
        let picked = choose(&mut p, "subnet", vec!["a", "b", "c"], |s| s.to_string()).unwrap();
        assert_eq!(picked, "b");
    }
}
