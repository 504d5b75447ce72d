/*! Recover a MIFARE Classic sector key from reader-side
authentication traces.

Two modes:

```no_run
$ mfkey m64 4c2b1aa9 2b7f3d68 af999e1e 681d87bc 393d1504
Found key [ A0B1C2D3E4F5 ]
$ mfkey m32 52c6129b 7d15e439 a5d4b07e d6734513 9e3c714b 80a93266 4b01885d
Found key [ 97A1C2D3E4F5 ]
```
*/
use anyhow::Result;
use clap::Parser;

use tagcrack::mfkey::{mfkey32_moebius, mfkey64};
use tagcrack::{Error, parse_hex_u32};

#[derive(clap::Parser, Debug)]
#[command(version, about = "Key recovery from reader authentication traces")]
struct Opt {
    #[command(subcommand)]
    mode: Mode,

    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Subcommand, Debug)]
enum Mode {
    /// One full authentication (uid, plaintext nt, nr, ar, at).
    M64 {
        uid: String,
        nt: String,
        nr_enc: String,
        ar_enc: String,
        at_enc: String,
    },
    /// Two reader attempts against an emulated card ("moebius").
    M32 {
        uid: String,
        nt0: String,
        nr0_enc: String,
        ar0_enc: String,
        nt1: String,
        nr1_enc: String,
        ar1_enc: String,
    },
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("tagcrack")
        .verbosity(usize::from(opt.verbose))
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let key = match &opt.mode {
        Mode::M64 {
            uid,
            nt,
            nr_enc,
            ar_enc,
            at_enc,
        } => mfkey64(
            parse_hex_u32(uid)?,
            parse_hex_u32(nt)?,
            parse_hex_u32(nr_enc)?,
            parse_hex_u32(ar_enc)?,
            parse_hex_u32(at_enc)?,
        ),
        Mode::M32 {
            uid,
            nt0,
            nr0_enc,
            ar0_enc,
            nt1,
            nr1_enc,
            ar1_enc,
        } => mfkey32_moebius(
            parse_hex_u32(uid)?,
            (
                parse_hex_u32(nt0)?,
                parse_hex_u32(nr0_enc)?,
                parse_hex_u32(ar0_enc)?,
            ),
            (
                parse_hex_u32(nt1)?,
                parse_hex_u32(nr1_enc)?,
                parse_hex_u32(ar1_enc)?,
            ),
        ),
    };

    match key {
        Some(key) => {
            println!("Found key [ {key:012X} ]");
            Ok(())
        }
        None => {
            println!("No key found: trace is not a consistent authentication");
            Err(Error::NoKeyFound.into())
        }
    }
}
