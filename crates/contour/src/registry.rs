//! Named streams and hot reload.
//!
//! A reload is a bracket: [`Registry::begin_reload`], any number of
//! [`Registry::register`] calls, then [`Registry::end_reload`]. Streams
//! registered inside the bracket are staged and only go live when it ends;
//! names that were not registered are released and removed at that point.
//! [`Registry::abort_reload`] drops the staged streams and leaves the live
//! ones untouched. Replacing an existing name keeps the old stream's trigger
//! state, so a reload that leaves a stream unchanged does not retrigger it.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::stream::Stream;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a reload is already in progress")]
    ReloadInProgress,
    #[error("no reload in progress")]
    NoReloadInProgress,
}

/// Releases every voice a stream is sounding and forgets its note.
pub trait VoiceReleaser {
    fn release_stream(&mut self, name: &str);
}

#[derive(Debug, Default)]
pub struct Registry {
    streams: BTreeMap<String, Stream>,
    /// Registrations made inside an open reload bracket.
    staged: Option<BTreeMap<String, Stream>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reloading(&self) -> bool {
        self.staged.is_some()
    }

    pub fn begin_reload(&mut self) -> Result<(), RegistryError> {
        if self.staged.is_some() {
            return Err(RegistryError::ReloadInProgress);
        }
        self.staged = Some(BTreeMap::new());
        Ok(())
    }

    /// Insert or replace `name`. Inside a reload bracket the stream is
    /// staged until [`Registry::end_reload`].
    pub fn register(&mut self, name: &str, mut stream: Stream, releaser: &mut dyn VoiceReleaser) {
        stream.set_name(name);
        match self.staged.as_mut() {
            Some(staged) => {
                staged.insert(name.to_string(), stream);
                debug!("staged stream {}", name);
            }
            None => self.install(name, stream, releaser),
        }
    }

    /// A replaced stream hands its trigger state to the new one and has its
    /// voices released.
    fn install(&mut self, name: &str, mut stream: Stream, releaser: &mut dyn VoiceReleaser) {
        if let Some(previous) = self.streams.get(name) {
            stream.transfer_state_from(previous);
            releaser.release_stream(name);
            debug!("replaced stream {}", name);
        } else {
            debug!("registered stream {}", name);
        }
        self.streams.insert(name.to_string(), stream);
    }

    /// Close the bracket: staged streams go live and every stream not
    /// registered inside it is removed. Returns the removed names in order.
    pub fn end_reload(
        &mut self,
        releaser: &mut dyn VoiceReleaser,
    ) -> Result<Vec<String>, RegistryError> {
        let staged = self.staged.take().ok_or(RegistryError::NoReloadInProgress)?;

        let stale: Vec<String> = self
            .streams
            .keys()
            .filter(|name| !staged.contains_key(*name))
            .cloned()
            .collect();
        for (name, stream) in staged {
            self.install(&name, stream, releaser);
        }
        for name in &stale {
            releaser.release_stream(name);
            self.streams.remove(name);
        }

        if !stale.is_empty() {
            info!("reload removed {} stream(s): {}", stale.len(), stale.join(", "));
        }
        Ok(stale)
    }

    /// Close the bracket, discarding everything staged inside it.
    pub fn abort_reload(&mut self) {
        if let Some(staged) = self.staged.take() {
            debug!(
                "reload aborted; dropped {} staged, kept {} live stream(s)",
                staged.len(),
                self.streams.len()
            );
        }
    }

    /// Remove `name`, live or staged.
    pub fn remove(&mut self, name: &str, releaser: &mut dyn VoiceReleaser) -> bool {
        let staged = self
            .staged
            .as_mut()
            .is_some_and(|staged| staged.remove(name).is_some());
        if self.streams.remove(name).is_some() {
            releaser.release_stream(name);
            true
        } else {
            staged
        }
    }

    pub fn clear(&mut self, releaser: &mut dyn VoiceReleaser) {
        for name in self.streams.keys() {
            releaser.release_stream(name);
        }
        self.streams.clear();
        if let Some(staged) = self.staged.as_mut() {
            staged.clear();
        }
    }

    pub fn get(&self, name: &str) -> Option<&Stream> {
        self.streams.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Streams in name order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Stream)> {
        self.streams.iter_mut().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::NoteValue;
    use crate::signal::Signal;

    #[derive(Default)]
    struct Released(Vec<String>);

    impl VoiceReleaser for Released {
        fn release_stream(&mut self, name: &str) {
            self.0.push(name.to_string());
        }
    }

    fn stream() -> Stream {
        Stream::new([60.0, 62.0], Signal::time().mul(10.0)).unwrap()
    }

    #[test]
    fn reload_keeps_trigger_state_of_unchanged_streams() {
        let mut registry = Registry::new();
        let mut released = Released::default();
        registry.register("a", stream(), &mut released);

        for (_, s) in registry.iter_mut() {
            s.tick(0.15);
        }

        registry.begin_reload().unwrap();
        registry.register("a", stream(), &mut released);
        registry.end_reload(&mut released).unwrap();

        let (_, s) = registry.iter_mut().next().unwrap();
        assert_eq!(s.last_floor(), Some(1.0));
        // Same floor as before the reload, so nothing fires
        assert!(!s.tick(0.16).trigger);
        assert_eq!(released.0, vec!["a"]);
    }

    #[test]
    fn reload_removes_unregistered_names() {
        let mut registry = Registry::new();
        let mut released = Released::default();
        registry.register("a", stream(), &mut released);
        registry.register("b", stream(), &mut released);
        registry.register("c", stream(), &mut released);

        registry.begin_reload().unwrap();
        registry.register("b", stream(), &mut released);
        let removed = registry.end_reload(&mut released).unwrap();

        assert_eq!(removed, vec!["a", "c"]);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(released.0, vec!["b", "a", "c"]);
    }

    #[test]
    fn nested_begin_is_rejected() {
        let mut registry = Registry::new();
        registry.begin_reload().unwrap();
        assert_eq!(registry.begin_reload(), Err(RegistryError::ReloadInProgress));
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let mut registry = Registry::new();
        let mut released = Released::default();
        assert_eq!(
            registry.end_reload(&mut released),
            Err(RegistryError::NoReloadInProgress)
        );
    }

    #[test]
    fn abort_discards_staged_streams() {
        let mut registry = Registry::new();
        let mut released = Released::default();
        registry.register("old", stream(), &mut released);
        for (_, s) in registry.iter_mut() {
            s.tick(0.15);
        }

        registry.begin_reload().unwrap();
        registry.register("old", Stream::new([72.0], Signal::time()).unwrap(), &mut released);
        registry.register("new", stream(), &mut released);
        registry.abort_reload();

        assert!(!registry.is_reloading());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["old"]);
        let old = registry.get("old").unwrap();
        assert_eq!(old.values(), &[NoteValue::Pitch(60.0), NoteValue::Pitch(62.0)]);
        assert_eq!(old.last_floor(), Some(1.0));
        assert!(released.0.is_empty());
    }

    #[test]
    fn staged_streams_are_not_live_until_the_bracket_ends() {
        let mut registry = Registry::new();
        let mut released = Released::default();
        registry.register("a", stream(), &mut released);

        registry.begin_reload().unwrap();
        registry.register("a", stream(), &mut released);
        registry.register("b", stream(), &mut released);
        assert!(!registry.contains("b"));
        assert!(released.0.is_empty());

        registry.end_reload(&mut released).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(released.0, vec!["a"]);
    }

    #[test]
    fn remove_reaches_staged_streams() {
        let mut registry = Registry::new();
        let mut released = Released::default();
        registry.begin_reload().unwrap();
        registry.register("a", stream(), &mut released);

        assert!(registry.remove("a", &mut released));
        assert!(registry.end_reload(&mut released).unwrap().is_empty());
        assert!(registry.is_empty());
        assert!(released.0.is_empty());
    }

    #[test]
    fn remove_and_clear_release_voices() {
        let mut registry = Registry::new();
        let mut released = Released::default();
        registry.register("a", stream(), &mut released);
        registry.register("b", stream(), &mut released);

        assert!(registry.remove("a", &mut released));
        assert!(!registry.remove("a", &mut released));
        registry.clear(&mut released);

        assert!(registry.is_empty());
        assert_eq!(released.0, vec!["a", "b"]);
    }
}
