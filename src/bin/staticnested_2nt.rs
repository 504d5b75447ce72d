/*! Recover keys from a static encrypted nested authentication using
two samples.

Runs both recovery pipelines — the frequency-ranked nested search
and the 16-bit-window meet-in-the-middle — and prints each list.

```no_run
$ staticnested_2nt 461dce03 7eef3586 ffb02eda 322bc14d ffc875ca
[…]
[ 1 ] FFFFFFFFFF01
```
*/
use anyhow::Result;
use clap::Parser;

use tagcrack::nested::{NtpKs1, nested};
use tagcrack::staticnested::staticnested_2nt;
use tagcrack::{Error, parse_hex_u32};

#[derive(clap::Parser, Debug)]
#[command(version, about = "MIFARE Classic static nested key recovery")]
struct Opt {
    /// Card UID (hex).
    uid: String,
    /// First tag nonce (hex).
    nt1: String,
    /// Keystream observed with the first nonce (hex).
    ks1: String,
    /// Second tag nonce (hex).
    nt2: String,
    /// Keystream observed with the second nonce (hex).
    ks2: String,

    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("tagcrack")
        .verbosity(usize::from(opt.verbose))
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let uid = parse_hex_u32(&opt.uid)?;
    let samples = [
        NtpKs1 {
            ntp: parse_hex_u32(&opt.nt1)?,
            ks1: parse_hex_u32(&opt.ks1)?,
        },
        NtpKs1 {
            ntp: parse_hex_u32(&opt.nt2)?,
            ks1: parse_hex_u32(&opt.ks2)?,
        },
    ];

    println!("uid... {uid:08x}");
    println!("nt1... {:08x}", samples[0].ntp);
    println!("ks1... {:08x}", samples[0].ks1);
    println!("nt2... {:08x}", samples[1].ntp);
    println!("ks2... {:08x}", samples[1].ks1);
    println!("\nRecovery...");

    let ranked = nested(&samples, uid);
    if !ranked.is_empty() {
        println!("\nRanked nested search: {} key candidates", ranked.len());
        for (i, key) in ranked.iter().enumerate() {
            println!("[ {} ] {key:012X}", i + 1);
        }
    }

    let windowed = staticnested_2nt(
        uid,
        samples[0].ntp,
        samples[0].ks1,
        samples[1].ntp,
        samples[1].ks1,
    );
    if !windowed.is_empty() {
        println!("\nWindow intersection: {} key candidates", windowed.len());
        for (i, key) in windowed.iter().enumerate() {
            println!("[ {} ] {key:012X}", i + 1);
        }
    }

    if ranked.is_empty() && windowed.is_empty() {
        println!("\nFailed to find a key");
        return Err(Error::NoKeyFound.into());
    }
    Ok(())
}
