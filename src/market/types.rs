//! Tipos trocados com o marketplace de computação.
//!
//! Todas as structs públicas derivam `Serialize` e `Deserialize`, pois são o
//! formato JSON do gateway REST. Os tipos `pub(crate)` no fim do arquivo só
//! existem no fio e não escapam do cliente.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Network;
use crate::requirement::ComputeRequirement;

/// Identificador de um provedor, atribuído pelo marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Termos de preço de uma oferta, em moeda por segundo.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pricing {
    /// Preço fixo cobrado ao iniciar a atividade.
    pub fixed: f64,
    /// Preço por segundo de CPU.
    pub cpu_per_sec: f64,
    /// Preço por segundo de relógio.
    pub duration_per_sec: f64,
}

/// Uma oferta de capacidade publicada por um provedor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub provider_id: ProviderId,
    /// Nome legível do nó, apenas para logs.
    #[serde(default)]
    pub provider_name: String,
    pub pricing: Pricing,
}

/// Corpo da requisição que abre uma sessão com orçamento limitado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub job_id: String,
    pub budget: f64,
    pub network: Network,
    pub payment_driver: String,
    pub subnet_tag: String,
    pub requirement: ComputeRequirement,
}

/// Resultado de um comando executado no provedor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Código de saída; `None` se o processo remoto foi morto.
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionCreated {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ActivityRequest<'a> {
    pub provider_id: &'a ProviderId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActivityCreated {
    pub activity_id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExecRequest<'a> {
    pub command: [&'a str; 3],
}
