//! A line-oriented shell driving the filesystem engine from a script file or
//! interactively from stdin: attach/init/format/mount an image, manipulate
//! its directory tree, move bytes to and from the host, and install GRUB.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use fatimg::block::MediaKind;
use fatimg::{BlockDevice, Fat12FileSystem, FsError, GrubInstaller};

#[derive(Parser, Debug)]
#[command(name = "fatimg-shell", about = "Interactive/scripted driver for the FAT12 image engine")]
struct Args {
    /// A script file to run instead of reading from stdin.
    script: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Ok = 0,
    Error = 1,
    Terminate = 2,
}

struct Shell {
    device: Option<BlockDevice>,
    fs: Option<Fat12FileSystem>,
    vars: HashMap<String, String>,
    import_buffer: Vec<u8>,
}

impl Shell {
    fn new() -> Self {
        Self {
            device: None,
            fs: None,
            vars: HashMap::new(),
            import_buffer: Vec::new(),
        }
    }

    fn substitute(&self, tokens: &[String]) -> Vec<String> {
        tokens
            .iter()
            .map(|t| {
                if let Some(name) = t.strip_prefix('$') {
                    self.vars.get(name).cloned().unwrap_or_default()
                } else {
                    t.clone()
                }
            })
            .collect()
    }

    fn run_line(&mut self, line: &str) -> ExitCode {
        let tokens = match tokenize(line) {
            Ok(t) => t,
            Err(e) => {
                error!("parse error: {}", e);
                return ExitCode::Error;
            }
        };
        if tokens.is_empty() {
            return ExitCode::Ok;
        }

        let tokens = self.substitute(&tokens);
        let cmd = tokens[0].as_str();
        let args = &tokens[1..];

        let result = match cmd {
            "attach" => self.cmd_attach(args),
            "detach" => self.cmd_detach(args),
            "init" => self.cmd_init(args),
            "format" => self.cmd_format(args),
            "mount" => self.cmd_mount(args),
            "unmount" => self.cmd_unmount(args),
            "ls" => self.cmd_ls(args),
            "cd" => self.cmd_cd(args),
            "mkdir" => self.cmd_mkdir(args),
            "touch" => self.cmd_touch(args),
            "rm" => self.cmd_rm(args),
            "import" => self.cmd_import(args),
            "export" => self.cmd_export(args),
            "write" => self.cmd_write(args),
            "read" => self.cmd_read(args),
            "set" => self.cmd_set(args, false),
            "setu" => self.cmd_set(args, true),
            "grub" => self.cmd_grub(args),
            "exit" => return ExitCode::Terminate,
            other => Err(format!("unknown command '{}'", other)),
        };

        match result {
            Ok(()) => ExitCode::Ok,
            Err(msg) => {
                error!("{}", msg);
                ExitCode::Error
            }
        }
    }

    fn cmd_attach(&mut self, args: &[String]) -> Result<(), String> {
        let mut media = MediaKind::Floppy;
        let mut create = false;
        let mut path = None;
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-m" => {
                    i += 1;
                    media = match args.get(i).map(String::as_str) {
                        Some("hdd") => MediaKind::HardDisk,
                        Some("floppy") | None => MediaKind::Floppy,
                        Some(other) => return Err(format!("unknown media '{}'", other)),
                    };
                }
                "-c" => create = true,
                other => path = Some(other.to_string()),
            }
            i += 1;
        }
        let path = path.ok_or("attach requires a path")?;
        self.device = Some(BlockDevice::create(&path, media, create).map_err(|e| e.to_string())?);
        info!("attached {}", path);
        Ok(())
    }

    fn cmd_detach(&mut self, _args: &[String]) -> Result<(), String> {
        if self.fs.is_some() {
            return Err("device is still mounted; unmount first".to_string());
        }
        self.device = None;
        Ok(())
    }

    fn cmd_init(&mut self, args: &[String]) -> Result<(), String> {
        let mut bps: u32 = 512;
        let mut count: u64 = 0;
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "-b" => {
                    i += 1;
                    bps = args.get(i).and_then(|s| s.parse().ok()).ok_or("invalid -b value")?;
                }
                "-c" => {
                    i += 1;
                    count = args.get(i).and_then(|s| s.parse().ok()).ok_or("invalid -c value")?;
                }
                other => return Err(format!("unexpected argument '{}'", other)),
            }
            i += 1;
        }
        let dev = self.device.as_mut().ok_or("no device attached")?;
        dev.init(bps, count).map_err(|e| e.to_string())
    }

    fn cmd_format(&mut self, args: &[String]) -> Result<(), String> {
        let fs_type = args.first().ok_or("format requires a filesystem type")?;
        if fs_type != "FAT12" && fs_type != "fat12" {
            return Err(format!("unsupported filesystem type '{}'", fs_type));
        }
        let reserved: u16 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
        let device = self.device.take().ok_or("no device attached")?;
        let device = Fat12FileSystem::format(device, "FATIMG", reserved, None).map_err(|e| e.to_string())?;
        self.device = Some(device);
        Ok(())
    }

    fn cmd_mount(&mut self, _args: &[String]) -> Result<(), String> {
        let device = self.device.take().ok_or("no device attached")?;
        match Fat12FileSystem::mount(device) {
            Ok(fs) => {
                self.fs = Some(fs);
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn cmd_unmount(&mut self, _args: &[String]) -> Result<(), String> {
        let fs = self.fs.take().ok_or("nothing mounted")?;
        self.device = Some(fs.unmount());
        Ok(())
    }

    fn fs_mut(&mut self) -> Result<&mut Fat12FileSystem, String> {
        self.fs.as_mut().ok_or_else(|| "nothing mounted".to_string())
    }

    fn cmd_ls(&mut self, _args: &[String]) -> Result<(), String> {
        let fs = self.fs_mut()?;
        for node in fs.get_directory_list() {
            println!("{:>10}  {}", node.size, node.name);
        }
        Ok(())
    }

    fn cmd_cd(&mut self, args: &[String]) -> Result<(), String> {
        let name = args.first().ok_or("cd requires a name")?;
        self.fs_mut()?.set_directory(name).map_err(|e| e.to_string())
    }

    fn cmd_mkdir(&mut self, args: &[String]) -> Result<(), String> {
        let name = args.first().ok_or("mkdir requires a name")?;
        let fs = self.fs_mut()?;
        fs.create_dir(name).map_err(|e| e.to_string())?;
        fs.flush().map_err(|e| e.to_string())
    }

    fn cmd_touch(&mut self, args: &[String]) -> Result<(), String> {
        let name = args.first().ok_or("touch requires a name")?;
        let fs = self.fs_mut()?;
        fs.create_file(name).map_err(|e| e.to_string())?;
        fs.flush().map_err(|e| e.to_string())
    }

    fn cmd_rm(&mut self, args: &[String]) -> Result<(), String> {
        let name = args.first().ok_or("rm requires a name")?;
        self.fs_mut()?.remove(name).map_err(|e| e.to_string())
    }

    fn cmd_import(&mut self, args: &[String]) -> Result<(), String> {
        let host_path = args.first().ok_or("import requires a host path")?;
        self.import_buffer = std::fs::read(host_path).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn cmd_export(&mut self, args: &[String]) -> Result<(), String> {
        let image_name = args.first().ok_or("export requires an image-side name")?;
        let host_path = args.get(1).ok_or("export requires a host-side path")?;
        let bytes = self.fs_mut()?.read(image_name).map_err(|e| e.to_string())?;
        std::fs::write(host_path, bytes).map_err(|e| e.to_string())
    }

    fn cmd_write(&mut self, args: &[String]) -> Result<(), String> {
        let name = args.first().ok_or("write requires a name")?;
        let bytes = self.import_buffer.clone();
        self.fs_mut()?.write(name, &bytes).map_err(|e| e.to_string())
    }

    fn cmd_read(&mut self, args: &[String]) -> Result<(), String> {
        let name = args.first().ok_or("read requires a name")?;
        self.import_buffer = self.fs_mut()?.read(name).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn cmd_set(&mut self, args: &[String], upper: bool) -> Result<(), String> {
        let name = args.first().ok_or("set requires a variable name")?.clone();
        let value = args.get(1).cloned().unwrap_or_default();
        let value = if upper { value.to_ascii_uppercase() } else { value };
        self.vars.insert(name, value);
        Ok(())
    }

    fn cmd_grub(&mut self, args: &[String]) -> Result<(), String> {
        let mut install_path = "/boot/grub".to_string();
        let mut i = 0;
        let mut source = None;
        while i < args.len() {
            match args[i].as_str() {
                "-d" => {
                    i += 1;
                    install_path = args.get(i).ok_or("-d requires a value")?.clone();
                }
                "-c" | "-n" | "-r" | "-k" => {
                    i += 1; // accepted but not consumed by the minimum-viable install
                }
                other => source = Some(other.to_string()),
            }
            i += 1;
        }
        let source = source.ok_or("grub requires a source directory")?;

        let stage1 = std::fs::read(format!("{}/stage1", source)).map_err(|e| FsError::GrubMissingFile {
            path: format!("{}/stage1", source).into(),
            source: e,
        }.to_string())?;
        let stage2 = std::fs::read(format!("{}/stage2", source)).map_err(|e| FsError::GrubMissingFile {
            path: format!("{}/stage2", source).into(),
            source: e,
        }.to_string())?;

        let installer = GrubInstaller::new(install_path);
        let fs = self.fs_mut()?;
        installer.install(fs, &stage1, &stage2).map_err(|e| e.to_string())
    }
}

fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let line = line.split('#').next().unwrap_or("");
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn run<R: BufRead>(reader: R) -> ExitCode {
    let mut shell = Shell::new();
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("failed to read input: {}", e);
                return ExitCode::Error;
            }
        };
        match shell.run_line(&line) {
            ExitCode::Ok => continue,
            other => return other,
        }
    }
    ExitCode::Ok
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let code = if let Some(script) = args.script {
        match File::open(&script) {
            Ok(f) => run(io::BufReader::new(f)),
            Err(e) => {
                eprintln!("could not open script {:?}: {}", script, e);
                ExitCode::Error
            }
        }
    } else {
        let stdin = io::stdin();
        run(stdin.lock())
    };

    io::stdout().flush().ok();
    std::process::exit(match code {
        ExitCode::Ok => 0,
        ExitCode::Error => 1,
        ExitCode::Terminate => 0,
    });
}
