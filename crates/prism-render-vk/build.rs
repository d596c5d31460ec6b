use std::{env, fs, path::PathBuf};

// Compiles shaders/mesh.{vert,frag} into OUT_DIR; the crate embeds them as
// the default shader set. Layout must match pipeline.rs:
//   binding 0: MeshUniforms (vertex), binding 1: sampler2D (fragment)
//   location 0 pos, 1 color, 2 uv
fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
    let src = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"))
        .join("shaders");

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (name, kind) in [
        ("mesh.vert", shaderc::ShaderKind::Vertex),
        ("mesh.frag", shaderc::ShaderKind::Fragment),
    ] {
        let path = src.join(name);
        println!("cargo:rerun-if-changed={}", path.display());
        let glsl = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
        let spv = comp
            .compile_into_spirv(&glsl, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("compiling {name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("writing {name}.spv: {e}"));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
