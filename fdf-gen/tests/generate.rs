//! Whole-pipeline generation: parse a multi-section FDF, compose every
//! artifact through the stub encoder, and check the layout invariants on
//! the resulting bytes.

use proptest::prelude::*;

use fdf_gen::toolchain::{ModuleInfo, ModuleOutput, StubToolchain};
use fdf_gen::GenContext;
use fdf_parser::{CompileSession, SourceBuffer};

fn parse(text: &str) -> fdf_parser::Document {
    let buf = SourceBuffer::new("t.fdf", text);
    let mut session = CompileSession::new("t.fdf");
    fdf_parser::parse(&buf, &mut session).unwrap()
}

const PLATFORM: &str = "\
[FD.Boot]
BaseAddress   = 0xFF800000
Size          = 0x10000
ErasePolarity = 1
BlockSize     = 0x1000
NumBlocks     = 0x10

0x0000|0x4000
FV = FVMAIN

0x8000|0x0100
DATA = { 0xDE, 0xAD, 0xBE, 0xEF }

[FV.FVMAIN]
FvAlignment = 16
INF Drivers/Main.inf

[Rule.Common.DXE_DRIVER]
FILE DRIVER = $(NAMED_GUID) {
  SECTION DXE_DEPEX_EXP = { gEfiVariableArchProtocolGuid }
  SECTION PE32 PE32
  SECTION UI = \"$(MODULE_NAME)\"
}
";

fn stub() -> StubToolchain {
    let mut stub = StubToolchain::new();
    stub.insert_module(
        "./Drivers/Main.inf",
        ModuleInfo {
            name: "Main".into(),
            guid: "9E21FD93-9C72-4C15-8C4B-E77F1DB2D792".into(),
            module_type: "DXE_DRIVER".into(),
            outputs: vec![ModuleOutput {
                file_type: "PE32".into(),
                extension: ".efi".into(),
                data: vec![0x4D, 0x5A, 0x90, 0x00],
            }],
        },
    );
    stub.insert_symbol(
        "gEfiVariableArchProtocolGuid",
        "1E5668E2-8481-11D4-BCF1-0080C73C8881",
    );
    stub
}

#[test]
fn planned_fd_image_honors_the_layout() {
    let document = parse(PLATFORM);
    let stub = stub();
    let mut ctx = GenContext::new(&document, &stub, ".", "out");
    let artifacts = ctx.plan().unwrap();

    let fd = artifacts
        .iter()
        .find(|a| a.path.ends_with("BOOT.fd"))
        .expect("FD artifact");
    assert_eq!(fd.data.len(), 0x10000);
    // FV region starts with the stub volume tag
    assert_eq!(fd.data[0], StubToolchain::TAG_VOLUME);
    // DATA region is copied verbatim, the byte after it keeps the pad
    assert_eq!(&fd.data[0x8000..0x8004], &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(fd.data[0x8004], 0xFF);
    // untouched tail is all pad bytes
    assert!(fd.data[0x9000..].iter().all(|&b| b == 0xFF));

    // the standalone volume artifact matches the bytes placed in the FD
    let fv = artifacts
        .iter()
        .find(|a| a.path.ends_with("FVMAIN.Fv"))
        .expect("FV artifact");
    assert_eq!(&fd.data[..fv.data.len()], fv.data.as_slice());
}

#[test]
fn generate_writes_artifacts_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let document = parse(PLATFORM);
    let stub = stub();
    let mut ctx = GenContext::new(&document, &stub, ".", dir.path());
    let written = ctx.generate().unwrap();
    assert!(written.iter().any(|p| p.ends_with("BOOT.fd")));
    for path in &written {
        assert!(path.exists(), "missing {}", path.display());
    }
    let image = std::fs::read(dir.path().join("BOOT.fd")).unwrap();
    assert_eq!(image.len(), 0x10000);
}

#[test]
fn unknown_fv_reference_names_the_referrer() {
    let document = parse(
        "[FD.Boot]\nBaseAddress = 0\nSize = 0x1000\nErasePolarity = 1\n\
         0x0|0x100\nFV = MISSING\n",
    );
    let stub = StubToolchain::new();
    let mut ctx = GenContext::new(&document, &stub, ".", "out");
    let err = ctx.plan().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("MISSING"), "got: {}", message);
    assert!(message.contains("FD.Boot"), "got: {}", message);
}

#[test]
fn cycle_is_rejected_before_any_composition() {
    let document = parse(
        "[FV.A]\nFILE FV_IMAGE = 9E21FD93-9C72-4C15-8C4B-E77F1DB2D792 {\n\
         SECTION FV_IMAGE = B\n}\n\
         [FV.B]\nFILE FV_IMAGE = 1A1E2341-A373-4A98-A3E6-D7E6FDAB3CCC {\n\
         SECTION FV_IMAGE = A\n}\n",
    );
    let stub = StubToolchain::new();
    let mut ctx = GenContext::new(&document, &stub, ".", "out");
    assert!(ctx.plan().is_err());
}

proptest! {
    // Inline data of any size that fits lands at its offset and leaves
    // every other byte at the pad value.
    #[test]
    fn data_regions_place_bytes_exactly(bytes in proptest::collection::vec(any::<u8>(), 1..64)) {
        let hex: Vec<String> = bytes.iter().map(|b| format!("{:#04x}", b)).collect();
        let text = format!(
            "[FD.Boot]\nBaseAddress = 0\nSize = 0x1000\nErasePolarity = 1\n\
             0x100|0x40\nDATA = {{ {} }}\n",
            hex.join(", ")
        );
        let document = parse(&text);
        let stub = StubToolchain::new();
        let mut ctx = GenContext::new(&document, &stub, ".", "out");
        let artifacts = ctx.plan().unwrap();
        let image = &artifacts[0].data;
        prop_assert_eq!(&image[0x100..0x100 + bytes.len()], bytes.as_slice());
        prop_assert!(image[..0x100].iter().all(|&b| b == 0xFF));
        prop_assert!(image[0x100 + bytes.len()..].iter().all(|&b| b == 0xFF));
    }
}
