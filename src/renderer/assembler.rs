//! Host program assembly
//!
//! Composes per-argument declarations and copy nests with a target's fixed
//! template into complete source files. Only argument positions, byte
//! sizes, type names and region ids reach the output; tensor contents never
//! do.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::args::{ArgDescriptor, ArgRole, KernelSignature};
use crate::backend::Target;
use crate::error::Result;
use crate::renderer::template::{Cast, HostTemplate, LocalType, Section};
use crate::renderer::{CopyDirection, CopyNames, IndexEmitter, LocalStyle, SourceWriter, TemplateVars};
use crate::shm::{RegionId, ShmError};

/// One generated source file, relative to the working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Everything handed to the external toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedProgram {
    pub target: Target,
    pub kernel_name: String,
    /// Host source first, then the kernel source if kept separately
    pub files: Vec<GeneratedFile>,
}

impl GeneratedProgram {
    pub fn host_file(&self) -> &GeneratedFile {
        &self.files[0]
    }

    pub fn host_source(&self) -> &str {
        &self.files[0].contents
    }

    pub fn kernel_file(&self) -> Option<&GeneratedFile> {
        self.files.get(1)
    }

    /// Write every file below `dir`, creating subdirectories as needed
    pub fn write_to(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let path = dir.join(&file.path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &file.contents)?;
            debug!("Wrote {} ({} bytes)", path.display(), file.contents.len());
            written.push(path);
        }
        Ok(written)
    }
}

/// Builds [`GeneratedProgram`]s from argument descriptors and region ids
#[derive(Debug, Clone)]
pub struct HostProgramAssembler {
    indent_size: usize,
    host_file: Option<String>,
}

impl Default for HostProgramAssembler {
    fn default() -> Self {
        Self::new(2)
    }
}

impl HostProgramAssembler {
    pub fn new(indent_size: usize) -> Self {
        Self {
            indent_size,
            host_file: None,
        }
    }

    /// Override the target's host source file name
    pub fn with_host_file(mut self, name: impl Into<String>) -> Self {
        self.host_file = Some(name.into());
        self
    }

    /// Assemble the host program (and kernel file) for `target`
    ///
    /// `regions` is aligned by argument position; every tensor must have
    /// a region id, scalars are ignored.
    pub fn assemble(
        &self,
        signature: &KernelSignature,
        args: &[ArgDescriptor],
        regions: &[Option<RegionId>],
        kernel_body: &str,
        target: Target,
    ) -> Result<GeneratedProgram> {
        signature.check_arity(args.len())?;
        let template = target.template();

        let mut region_ids = Vec::with_capacity(args.len());
        for arg in args {
            let id = regions.get(arg.index).copied().flatten();
            if arg.is_tensor() && id.is_none() {
                return Err(ShmError::NoRegion { index: arg.index }.into());
            }
            region_ids.push(id);
        }

        let kernel_file = template
            .kernel_file
            .map(|f| f.replace("{kernel}", &signature.name));
        let kernel_vars = self.kernel_vars(template, signature, args);
        let host = self.render_host(template, &kernel_vars, args, &region_ids, kernel_body);

        let host_name = self
            .host_file
            .clone()
            .unwrap_or_else(|| template.host_file.to_string());
        let mut files = vec![GeneratedFile {
            path: PathBuf::from(host_name),
            contents: host,
        }];
        if let Some(path) = kernel_file {
            let mut contents = kernel_body.to_string();
            if !contents.ends_with('\n') {
                contents.push('\n');
            }
            files.push(GeneratedFile {
                path: PathBuf::from(path),
                contents,
            });
        }

        debug!(
            "Assembled {} program for '{}' with {} argument(s)",
            target,
            signature.name,
            args.len()
        );
        Ok(GeneratedProgram {
            target,
            kernel_name: signature.name.clone(),
            files,
        })
    }

    fn local_name(template: &HostTemplate, arg: &ArgDescriptor) -> String {
        format!("{}{}", template.local_prefix, arg.index)
    }

    fn local_type(template: &HostTemplate, arg: &ArgDescriptor) -> String {
        match template.local_type {
            LocalType::Native => arg.layout.native().c_type_name().to_string(),
            LocalType::Hls => arg.dtype.hls_type_name(),
        }
    }

    /// Per-argument variables; `slot` counts the tensors before `arg`
    fn arg_vars(template: &HostTemplate, args: &[ArgDescriptor], arg: &ArgDescriptor) -> TemplateVars {
        let native = arg.layout.native();
        let slot = args
            .iter()
            .take_while(|a| a.index < arg.index)
            .filter(|a| a.is_tensor())
            .count();
        TemplateVars::new()
            .set("i", arg.index)
            .set("slot", slot)
            .set("type", native.c_type_name())
            .set("local", Self::local_name(template, arg))
            .set("bytes", arg.layout.byte_size())
            .set("count", arg.layout.element_count())
    }

    fn kernel_vars(
        &self,
        template: &HostTemplate,
        signature: &KernelSignature,
        args: &[ArgDescriptor],
    ) -> TemplateVars {
        let mut vars = TemplateVars::new().set("kernel", &signature.name);
        for list in template.lists {
            let joined = args
                .iter()
                .map(|arg| {
                    let pattern = if arg.is_tensor() { list.tensor } else { list.scalar };
                    Self::arg_vars(template, args, arg).render(pattern)
                })
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
                .join(list.separator);
            vars.insert(list.name, joined);
        }
        vars
    }

    fn copy_names(template: &HostTemplate, arg: &ArgDescriptor, direction: CopyDirection) -> CopyNames {
        let names = CopyNames::new(
            format!("arg_{}", arg.index),
            Self::local_name(template, arg),
            template.local_style,
        );
        match (template.cast, direction) {
            (Cast::None, _) => names,
            // the fixed-point type keeps the fraction through the right shift
            (Cast::External, CopyDirection::Unpack) => names.with_cast(arg.dtype.external_type_name()),
            _ => names.with_cast(arg.layout.native().c_type_name()),
        }
    }

    fn render_host(
        &self,
        template: &HostTemplate,
        kernel_vars: &TemplateVars,
        args: &[ArgDescriptor],
        region_ids: &[Option<RegionId>],
        kernel_body: &str,
    ) -> String {
        let mut w = SourceWriter::new(self.indent_size);
        w.raw(&kernel_vars.render(template.prologue));
        if template.embed_kernel {
            w.blank();
            w.raw(kernel_body);
        }
        w.blank();
        w.open(&kernel_vars.render(template.main_signature));
        for section in template.main_body {
            match section {
                Section::Text(text) => w.block(&kernel_vars.render(text)),
                Section::Blank => w.blank(),
                Section::EachArg { tensor, scalar } => {
                    for arg in args {
                        let pattern = if arg.is_tensor() { tensor } else { scalar };
                        let vars = kernel_vars.extend(&Self::arg_vars(template, args, arg));
                        w.block(&vars.render(pattern));
                    }
                }
                Section::Unpack => {
                    for (arg, id) in args.iter().zip(region_ids) {
                        self.unpack_arg(&mut w, template, arg, *id);
                        w.blank();
                    }
                }
                Section::Pack => {
                    for (arg, id) in args.iter().zip(region_ids) {
                        if id.is_some() {
                            self.pack_arg(&mut w, template, arg);
                        }
                    }
                }
            }
        }
        w.close();
        if !template.epilogue.is_empty() {
            w.blank();
            w.raw(&kernel_vars.render(template.epilogue));
        }
        w.finish()
    }

    fn unpack_arg(
        &self,
        w: &mut SourceWriter,
        template: &HostTemplate,
        arg: &ArgDescriptor,
        id: Option<RegionId>,
    ) {
        let native = arg.layout.native().c_type_name();
        let local = Self::local_name(template, arg);
        let local_type = Self::local_type(template, arg);
        let emitter = IndexEmitter::new(self.indent_size);
        let names = Self::copy_names(template, arg, CopyDirection::Unpack);

        match (&arg.role, id) {
            (ArgRole::Tensor, Some(id)) => {
                w.line(&format!(
                    "{native}* arg_{i} = ({native}*)shmat({id}, nullptr, 0);",
                    i = arg.index
                ));
                match template.local_style {
                    LocalStyle::Nested => {
                        let dims: String = arg
                            .layout
                            .shape()
                            .iter()
                            .map(|d| format!("[{d}]"))
                            .collect();
                        w.line(&format!("{local_type} {local}{dims};"));
                    }
                    LocalStyle::Flat => {
                        w.line(&format!(
                            "std::vector<{local_type}> {local}({});",
                            arg.layout.element_count()
                        ));
                    }
                }
            }
            (ArgRole::Scalar(value), _) => {
                w.line(&format!(
                    "{native} arg_{i} = ({native}){v};",
                    i = arg.index,
                    v = value.render()
                ));
                w.line(&format!("{local_type} {local};"));
            }
            // rejected in assemble
            (ArgRole::Tensor, None) => return,
        }
        emitter
            .nest(arg, &names, CopyDirection::Unpack)
            .render_into(w);
    }

    fn pack_arg(&self, w: &mut SourceWriter, template: &HostTemplate, arg: &ArgDescriptor) {
        let emitter = IndexEmitter::new(self.indent_size);
        let names = Self::copy_names(template, arg, CopyDirection::Pack);
        emitter.nest(arg, &names, CopyDirection::Pack).render_into(w);
        w.line(&format!("shmdt(arg_{});", arg.index));
    }
}
