//! Interface de linha de comando do voxqueue baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (say, batch, cache,
//! analytics, health) e flags globais (--config, --provider, --mock,
//! --workers, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::provider::{AudioFormat, ProviderKind};

/// voxqueue — fila de síntese de voz com failover entre provedores e cache de resultados.
#[derive(Debug, Parser)]
#[command(name = "voxqueue", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração TOML.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Provedor a usar nesta sessão.
    #[arg(long, global = true)]
    pub provider: Option<ProviderArg>,

    /// Usa provedores simulados (sem rede).
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Número de workers concorrentes.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Provedor aceito pela CLI, mapeado para [`ProviderKind`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    /// Provedor de streaming via WebSocket.
    Primary,
    /// Provedor HTTP de contingência.
    Secondary,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Primary => ProviderKind::Primary,
            ProviderArg::Secondary => ProviderKind::Secondary,
        }
    }
}

/// Formato de saída aceito pela CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FormatArg {
    #[default]
    Wav,
    Pcm,
}

impl From<FormatArg> for AudioFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Wav => AudioFormat::Wav,
            FormatArg::Pcm => AudioFormat::Pcm,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sintetiza um texto e espera o resultado.
    Say {
        /// Texto a ser falado.
        text: String,

        /// Identificador da voz.
        #[arg(long)]
        voice: Option<String>,

        /// Formato do áudio gerado.
        #[arg(long, value_enum, default_value_t = FormatArg::Wav)]
        format: FormatArg,

        /// Prioridade do job (0–10).
        #[arg(long, default_value_t = 5)]
        priority: u8,

        /// Arquivo onde salvar o áudio.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Enfileira jobs de um arquivo JSON e processa todos.
    Batch {
        /// Arquivo JSON com uma lista de jobs.
        file: PathBuf,
    },

    /// Inspeciona ou limpa o cache de resultados.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Mostra estatísticas de geração dos últimos dias.
    Analytics {
        /// Quantidade de dias a incluir.
        #[arg(long, default_value_t = 1)]
        days: u32,
    },

    /// Mostra o estado dos provedores e da fila.
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum CacheAction {
    /// Mostra estatísticas do cache.
    Stats,
    /// Remove todas as entradas do cache.
    Clear,
}
