//! Registro de identificadores para depuración.
//!
//! No es un singleton: cada `Hub` recibe (o crea) su propio `Registry` y lo
//! comparte con sus factories y threads. Sólo guarda el tipo de objeto por
//! id, nunca referencias al objeto.

use dashmap::DashMap;
use log::warn;

#[derive(Debug, Default)]
pub struct Registry {
    ids: DashMap<String, &'static str>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra `id`. Devuelve `false` (y avisa) si ya estaba registrado.
    pub fn register(&self, id: &str, kind: &'static str) -> bool {
        if let Some(prev) = self.ids.insert(id.to_string(), kind) {
            warn!("duplicate id '{id}' for {kind} (previously a {prev}); release it before reusing");
            return false;
        }
        true
    }

    pub fn release(&self, id: &str) -> bool {
        self.ids.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn kind_of(&self, id: &str) -> Option<&'static str> {
        self.ids.get(id).map(|k| *k)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Vacía el registro completo.
    pub fn clear(&self) {
        self.ids.clear();
    }
}
