use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::info;
use pdf_seal::{add_signature_placeholder, KeyMaterial, PlaceholderOptions, Verdict};

fn cli() -> Command {
    let input = Arg::new("input")
        .value_name("FILE")
        .help("PDF document to read")
        .value_parser(value_parser!(PathBuf))
        .required(true);
    let output = Arg::new("output")
        .short('o')
        .long("output")
        .value_name("FILE")
        .help("Where to write the result (defaults to standard output)")
        .value_parser(value_parser!(PathBuf));

    Command::new("pdf_seal")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Reserves, fills and verifies detached signatures in PDF documents")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("prepare")
                .about("Append an empty signature slot to a document")
                .arg(input.clone())
                .arg(output.clone())
                .arg(
                    Arg::new("signature-length")
                        .long("signature-length")
                        .value_name("BYTES")
                        .help("Largest DER signature the slot can hold")
                        .value_parser(value_parser!(usize))
                        .default_value("4096"),
                )
                .arg(
                    Arg::new("reason")
                        .long("reason")
                        .value_name("TEXT")
                        .help("Reason for signing, stored in the signature dictionary"),
                )
                .arg(
                    Arg::new("field-name")
                        .long("field-name")
                        .value_name("NAME")
                        .help("Name of the signature form field")
                        .default_value("Signature1"),
                )
                .arg(
                    Arg::new("no-date")
                        .long("no-date")
                        .help("Do not record the preparation time as the signing date")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("sign")
                .about("Fill the signature slot of a prepared document")
                .arg(input.clone())
                .arg(output)
                .arg(
                    Arg::new("pkcs12")
                        .long("pkcs12")
                        .value_name("FILE")
                        .help("PKCS #12 container with the signing certificate and key")
                        .env("PDF_SEAL_PKCS12")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                )
                .arg(
                    Arg::new("passphrase")
                        .long("passphrase")
                        .value_name("PASSPHRASE")
                        .help("Passphrase of the PKCS #12 container")
                        .env("PDF_SEAL_PASSPHRASE")
                        .hide_env_values(true)
                        .default_value(""),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Check the signature of a signed document")
                .arg(input),
        )
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("prepare", args)) => prepare(args),
        Some(("sign", args)) => sign(args),
        Some(("verify", args)) => verify(args),
        _ => unreachable!("a subcommand is required"),
    }
}

fn prepare(args: &ArgMatches) -> Result<ExitCode> {
    let input = read_input(args)?;
    let options = PlaceholderOptions {
        signature_length: *args.get_one::<usize>("signature-length").unwrap(),
        field_name: args.get_one::<String>("field-name").unwrap().clone(),
        reason: args.get_one::<String>("reason").cloned(),
        signing_date: (!args.get_flag("no-date")).then(Utc::now),
    };

    let prepared =
        add_signature_placeholder(&input, &options).context("Failed to reserve a signature slot")?;
    write_output(args, &prepared)?;
    Ok(ExitCode::SUCCESS)
}

fn sign(args: &ArgMatches) -> Result<ExitCode> {
    let input = read_input(args)?;
    let pkcs12_path = args.get_one::<PathBuf>("pkcs12").unwrap();
    let passphrase = args.get_one::<String>("passphrase").unwrap();

    let key = KeyMaterial::load(pkcs12_path, passphrase)
        .with_context(|| format!("Failed to load key material from {}", pkcs12_path.display()))?;
    info!("signing as {key:?}");

    let signed = pdf_seal::sign(&input, &key, Utc::now()).context("Failed to sign the document")?;
    write_output(args, &signed)?;
    Ok(ExitCode::SUCCESS)
}

fn verify(args: &ArgMatches) -> Result<ExitCode> {
    let input = read_input(args)?;

    match pdf_seal::verify(&input).context("Failed to verify the document")? {
        Verdict::Valid(info) => {
            let signer = info.signer.as_deref().unwrap_or("an unnamed signer");
            match info.signing_time {
                Some(time) => println!("valid: signed by {signer} at {}", time.to_rfc3339()),
                None => println!("valid: signed by {signer}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Verdict::Invalid(failure) => {
            println!("invalid: {failure}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn read_input(args: &ArgMatches) -> Result<Vec<u8>> {
    let path = args.get_one::<PathBuf>("input").unwrap();
    std::fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
}

fn write_output(args: &ArgMatches, bytes: &[u8]) -> Result<()> {
    match args.get_one::<PathBuf>("output") {
        Some(path) => write_file(path, bytes),
        None => std::io::stdout()
            .lock()
            .write_all(bytes)
            .context("Failed to write to standard output"),
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write output file: {}", path.display()))?;
    info!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}
