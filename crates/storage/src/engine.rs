//! Typed evaluation façade over a ruleset service.
//!
//! Callers that know what type a ruleset returns can fetch the decoded
//! value directly; a matched value of any other type is a `TypeMismatch`.

use decree_core::{EvalError, EvalResult, Params, Type};

use crate::error::StoreError;
use crate::service::RulesetService;

/// Convenience wrapper adding typed getters to any [`RulesetService`].
pub struct Engine<S> {
    service: S,
}

impl<S: RulesetService> Engine<S> {
    pub fn new(service: S) -> Engine<S> {
        Engine { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Evaluate the latest version of a ruleset.
    pub async fn get(
        &self,
        path: &str,
        params: &(dyn Params + Sync),
    ) -> Result<EvalResult, StoreError> {
        self.service.eval(path, None, params).await
    }

    /// Evaluate a specific version of a ruleset.
    pub async fn get_version(
        &self,
        path: &str,
        version: &str,
        params: &(dyn Params + Sync),
    ) -> Result<EvalResult, StoreError> {
        self.service.eval(path, Some(version), params).await
    }

    pub async fn get_string(
        &self,
        path: &str,
        params: &(dyn Params + Sync),
    ) -> Result<String, StoreError> {
        let result = self.typed(path, params, Type::String).await?;
        Ok(result.value.data)
    }

    pub async fn get_bool(
        &self,
        path: &str,
        params: &(dyn Params + Sync),
    ) -> Result<bool, StoreError> {
        let result = self.typed(path, params, Type::Bool).await?;
        Ok(result.value.data == "true")
    }

    pub async fn get_int64(
        &self,
        path: &str,
        params: &(dyn Params + Sync),
    ) -> Result<i64, StoreError> {
        let result = self.typed(path, params, Type::Int64).await?;
        result
            .value
            .data
            .parse::<i64>()
            .map_err(|e| StoreError::Backend(format!("corrupt int64 value: {e}")))
    }

    pub async fn get_float64(
        &self,
        path: &str,
        params: &(dyn Params + Sync),
    ) -> Result<f64, StoreError> {
        let result = self.typed(path, params, Type::Float64).await?;
        result
            .value
            .data
            .parse::<f64>()
            .map_err(|e| StoreError::Backend(format!("corrupt float64 value: {e}")))
    }

    async fn typed(
        &self,
        path: &str,
        params: &(dyn Params + Sync),
        expected: Type,
    ) -> Result<EvalResult, StoreError> {
        let result = self.service.eval(path, None, params).await?;
        if result.value.ty != expected {
            return Err(StoreError::Eval(EvalError::TypeMismatch {
                expected,
                got: result.value.ty,
            }));
        }
        Ok(result)
    }
}
