//! FactoryRegistry - SignalType → SignalFactory の対応表
//!
//! # 設計
//! - Session の初期化時に構築（mutable）
//! - 実行中は読み取りのみ
//! - 同じ tag の再登録は上書き（last write wins）。直前の factory を返すので、
//!   呼び出し側がログを出す

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::SignalType;
use crate::ports::SignalFactory;

#[derive(Default)]
pub struct FactoryRegistry {
    factories: HashMap<SignalType, Arc<dyn SignalFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Returns the factory previously registered under `signal_type`, if any.
    pub fn insert(
        &mut self,
        signal_type: SignalType,
        factory: Arc<dyn SignalFactory>,
    ) -> Option<Arc<dyn SignalFactory>> {
        self.factories.insert(signal_type, factory)
    }

    pub fn get(&self, signal_type: &SignalType) -> Option<Arc<dyn SignalFactory>> {
        self.factories.get(signal_type).cloned()
    }

    pub fn contains(&self, signal_type: &SignalType) -> bool {
        self.factories.contains_key(signal_type)
    }

    /// Sorted, so logs and errors are stable.
    pub fn registered_types(&self) -> Vec<SignalType> {
        let mut types: Vec<SignalType> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
