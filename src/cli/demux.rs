use camino::Utf8PathBuf;
use clap::Args;
use simple_error::{SimpleResult, bail};

use super::utils::{check_required_dirname, check_required_filename};

#[derive(Args)]
pub struct DemuxSettings {
    /// Tab-separated id map: index, forward output name, reverse output name, output subdirectory
    #[arg(long, value_name = "FILE")]
    pub id_map: Utf8PathBuf,

    /// Interleaved fastq input. Standard input is read if this is omitted or '-'
    #[arg(long, value_name = "FILE")]
    pub infile: Option<Utf8PathBuf>,

    /// Root directory of the demultiplexed output
    #[arg(long, value_name = "DIR")]
    pub output: Utf8PathBuf,

    /// Index of the read pairs to extract
    #[arg(long, value_name = "INDEX")]
    pub encoded_id: String,

    /// Compression buffer size in bytes
    #[arg(long, default_value_t = gzp::BUFSIZE)]
    pub block_size: usize,
}

pub fn validate_and_fix_demux_settings(settings: DemuxSettings) -> SimpleResult<DemuxSettings> {
    check_required_filename(&settings.id_map, "id map")?;
    if let Some(infile) = settings.infile.as_deref() {
        if infile.as_str() != "-" {
            check_required_filename(infile, "input fastq")?;
        }
    }
    check_required_dirname(&settings.output, "demux output")?;
    if settings.encoded_id.is_empty() {
        bail!("--encoded-id must not be empty");
    }
    if settings.block_size == 0 {
        bail!("--block-size argument must be greater than 0");
    }
    Ok(settings)
}
