//! Interface de linha de comando do framefarm baseada em clap.
//!
//! Define a struct [`Cli`] com os subcomandos [`Command`] (render e o worker
//! oculto) e a flag global `--verbose`.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{JobSettings, Network, OutputFormat};
use crate::error::FarmError;

/// framefarm: renderiza frames do Blender em provedores de um marketplace de computação.
#[derive(Debug, Parser)]
#[command(name = "framefarm", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Renderiza frames de uma cena `.blend` e baixa o resultado.
    Render(RenderArgs),

    /// Processo worker isolado: lê o job em JSON do stdin e emite progresso no stdout.
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Args)]
pub struct RenderArgs {
    /// Arquivo `.blend`; o diretório dele é empacotado e enviado aos provedores.
    #[arg(long)]
    pub blend: PathBuf,

    /// Diretório onde é criada a pasta do job com os frames renderizados.
    #[arg(long)]
    pub output: PathBuf,

    /// Arquivo TOML de configuração (padrão: `framefarm.toml` se existir).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Frames a renderizar, ex.: `1-250:5`, `1,3,10-20`.
    #[arg(long, default_value = "1", value_parser = parse_frames)]
    pub frames: FrameList,

    /// Máximo de provedores trabalhando ao mesmo tempo.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Teto de gasto da sessão.
    #[arg(long)]
    pub budget: Option<f64>,

    #[arg(long)]
    pub network: Option<NetworkArg>,

    #[arg(long)]
    pub format: Option<FormatArg>,
}

impl RenderArgs {
    /// Aplica as flags da linha de comando sobre as configurações do arquivo.
    pub fn apply(&self, settings: &mut JobSettings) {
        if let Some(workers) = self.workers {
            settings.resources.workers = workers;
        }
        if let Some(budget) = self.budget {
            settings.budget = budget;
        }
        if let Some(network) = self.network {
            settings.network = network.into();
        }
        if let Some(format) = self.format {
            settings.format = format.into();
        }
    }

    /// Nome da cena (sem extensão) e diretório do projeto.
    pub fn scene(&self) -> Result<(String, PathBuf), FarmError> {
        scene_of(&self.blend)
    }
}

fn scene_of(blend: &Path) -> Result<(String, PathBuf), FarmError> {
    let is_blend = blend.extension().is_some_and(|ext| ext == "blend");
    let scene = blend.file_stem().and_then(|stem| stem.to_str());
    let (true, Some(scene)) = (is_blend, scene) else {
        return Err(FarmError::Configuration(format!(
            "{} is not a .blend file",
            blend.display()
        )));
    };
    let project = match blend.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((scene.to_string(), project))
}

/// Máximo de frames aceitos numa lista.
pub const MAX_FRAMES: usize = 100_000;

/// Lista de frames já expandida.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameList(pub Vec<u32>);

/// Expande uma lista de frames: itens separados por vírgula, cada um `N`,
/// `A-B` ou `A-B:PASSO`.
pub fn parse_frames(list: &str) -> Result<FrameList, String> {
    let mut frames = Vec::new();
    for item in list.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let (range, step) = match item.split_once(':') {
            Some((range, step)) => (range, number(step)?),
            None => (item, 1),
        };
        if step == 0 {
            return Err(format!("step must be positive in `{item}`"));
        }
        match range.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (number(start)?, number(end)?);
                if start > end {
                    return Err(format!("range `{item}` ends before it starts"));
                }
                let count = u64::from(end - start) / u64::from(step) + 1;
                if frames.len() as u64 + count > MAX_FRAMES as u64 {
                    return Err(format!("more than {MAX_FRAMES} frames in `{list}`"));
                }
                frames.extend((start..=end).step_by(step as usize));
            }
            None => frames.push(number(range)?),
        }
        if frames.len() > MAX_FRAMES {
            return Err(format!("more than {MAX_FRAMES} frames in `{list}`"));
        }
    }
    if frames.is_empty() {
        return Err("no frames given".into());
    }
    Ok(FrameList(frames))
}

fn number(text: &str) -> Result<u32, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("`{text}` is not a frame number"))
}

/// Formato de saída aceito pela CLI, mapeado para [`OutputFormat`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Png,
    Bmp,
    Jpeg,
    OpenExr,
    OpenExrMultilayer,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Bmp => OutputFormat::Bmp,
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::OpenExr => OutputFormat::OpenExr,
            FormatArg::OpenExrMultilayer => OutputFormat::OpenExrMultilayer,
        }
    }
}

/// Rede de pagamento aceita pela CLI, mapeada para [`Network`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NetworkArg {
    /// Testnet Goerli.
    Goerli,
    /// Testnet Polygon Mumbai.
    Mumbai,
    /// Polygon mainnet.
    Polygon,
}

impl From<NetworkArg> for Network {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Goerli => Network::Goerli,
            NetworkArg::Mumbai => Network::Mumbai,
            NetworkArg::Polygon => Network::Polygon,
        }
    }
}
