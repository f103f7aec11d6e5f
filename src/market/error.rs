//! Tipos de erro do gateway do marketplace.
//!
//! [`MarketError`] cobre as falhas vistas ao falar com o gateway: respostas
//! HTTP de erro, arquivos remotos ausentes, falhas de rede e de disco local.

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com o marketplace.
#[derive(Debug, Error)]
pub enum MarketError {
    /// Erro retornado pelo gateway (ex.: 402 sem fundos, 500 erro interno).
    #[error("gateway error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// O recurso pedido não existe, por exemplo um arquivo de saída que o
    /// provedor não produziu.
    #[error("not found: {0}")]
    NotFound(String),

    /// Estado de sessão inválido (nenhuma sessão aberta, sessão duplicada).
    #[error("session error: {0}")]
    Session(String),

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Falha ao ler ou gravar um arquivo local.
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = MarketError::Api {
            status: 402,
            message: "insufficient funds".into(),
        };
        assert_eq!(
            err.to_string(),
            "gateway error (status 402): insufficient funds"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MarketError>();
    }
}
