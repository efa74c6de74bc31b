//! End-to-end pipeline tests over real project layouts on disk.

use sv_frontend::{
    diagnostics::ErrorKind,
    uhdm::{Collection, UhdmKind},
    Session,
};

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Self {
        Self { dir: tempfile::tempdir().unwrap() }
    }

    fn add(&self, name: &str, contents: &str) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn out_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("out")
    }
}

#[test]
fn small_design_compiles_clean() {
    let project = Project::new();
    project.add(
        "inc/widths.svh",
        "`define DATA_W 8\n",
    );
    let top = project.add(
        "top.sv",
        "`include \"widths.svh\"\n\
         module counter #(parameter int W = `DATA_W)(\n\
             input logic clk,\n\
             input logic rst_n,\n\
             output logic [W-1:0] count\n\
         );\n\
           always_ff @(posedge clk) begin\n\
             if (!rst_n) count <= '0;\n\
             else count <= count + 1'b1;\n\
           end\n\
         endmodule\n\
         module top;\n\
           logic clk, rst_n;\n\
           logic [15:0] value;\n\
           counter #(.W(16)) u_counter(.clk(clk), .rst_n(rst_n), .count(value));\n\
         endmodule\n",
    );
    let session = Session::builder()
        .source(&top)
        .include_dir(project.dir.path().join("inc"))
        .out_dir(project.out_dir())
        .max_threads(2)
        .build();
    let output = session.compile().unwrap();
    assert!(
        !output.errors.contains(ErrorKind::PaSyntaxError),
        "{}",
        session.log_diagnostics(&output).unwrap()
    );
    assert!(!output.errors.contains(ErrorKind::UhdmFailedToBind));
    assert_eq!(output.exit_code(), 0);
    let design = output.design.expect("design built");
    assert_eq!(design.top_instances.len(), 1);
    // the override specialized the instance
    let top_instance = design.top_instances[0];
    let mut stack = vec![top_instance];
    let mut specialized = false;
    while let Some(id) = stack.pop() {
        let object = design.serializer.get(id);
        if object.kind == UhdmKind::Parameter && object.value.as_int() == Some(16) {
            specialized = true;
        }
        stack.extend(object.owned_children());
    }
    assert!(specialized, "W=16 override reached the child instance");
    // the .uhdm output landed in the configured output directory
    let uhdm = output.uhdm_file.expect("uhdm written");
    assert!(uhdm.starts_with(project.out_dir()));
    assert!(uhdm.exists());
}

#[test]
fn parse_only_stops_before_elaboration() {
    let project = Project::new();
    let top = project.add("top.sv", "module top; wire w; endmodule\n");
    let session = Session::builder()
        .source(&top)
        .out_dir(project.out_dir())
        .parse_only(true)
        .build();
    let output = session.compile().unwrap();
    assert_eq!(output.exit_code(), 0);
    assert!(output.design.is_none());
    assert!(output.uhdm_file.is_none());
}

#[test]
fn syntax_errors_point_at_original_source() {
    let project = Project::new();
    let top = project.add(
        "broken.sv",
        "module broken;\n  assign = 1;\nendmodule\n",
    );
    let session =
        Session::builder().source(&top).out_dir(project.out_dir()).no_cache(true).build();
    let output = session.compile().unwrap();
    assert!(output.errors.contains(ErrorKind::PaSyntaxError));
    let rendered = output.errors.render(&session.fs, &session.symbols, false);
    assert!(rendered.contains("broken.sv:2:"), "{rendered}");
    assert!(rendered.contains("SYNTAX:"), "{rendered}");
}

#[test]
fn macro_error_reports_definition_site() {
    let project = Project::new();
    let top = project.add(
        "top.sv",
        "`define NEEDS_TWO(a, b) a+b\nmodule top;\n  wire w = `NEEDS_TWO(1);\nendmodule\n",
    );
    let session =
        Session::builder().source(&top).out_dir(project.out_dir()).no_cache(true).build();
    let output = session.compile().unwrap();
    assert!(output.errors.contains(ErrorKind::PpMacroNoDefaultValue));
}

#[test]
fn default_nettype_none_flags_implicit_net() {
    let project = Project::new();
    let top = project.add(
        "top.sv",
        "`default_nettype none\nmodule top;\n  assign x = 1'b1;\nendmodule\n",
    );
    let session =
        Session::builder().source(&top).out_dir(project.out_dir()).no_cache(true).build();
    let output = session.compile().unwrap();
    assert!(output.errors.contains(ErrorKind::ElabIllegalImplicitNet));
}

#[test]
fn implicit_net_binds_under_default_wire() {
    let project = Project::new();
    let top = project.add(
        "top.sv",
        "module top;\n  assign x = 1'b1;\nendmodule\n",
    );
    let session =
        Session::builder().source(&top).out_dir(project.out_dir()).no_cache(true).build();
    let output = session.compile().unwrap();
    assert!(!output.errors.contains(ErrorKind::ElabIllegalImplicitNet));
    assert!(!output.errors.contains(ErrorKind::UhdmFailedToBind));
    let design = output.design.unwrap();
    let x = session.symbols.get("x").unwrap();
    let found = design
        .serializer
        .ids()
        .any(|id| {
            let object = design.serializer.get(id);
            object.kind == UhdmKind::LogicNet && object.name == x
        });
    assert!(found, "implicit wire x synthesized");
}

#[test]
fn generate_loop_unrolls_through_the_pipeline() {
    let project = Project::new();
    let top = project.add(
        "top.sv",
        "module top;\n\
         generate for (genvar i = 0; i < 3; i++) begin : g\n  wire w_i;\nend endgenerate\n\
         endmodule\n",
    );
    let session =
        Session::builder().source(&top).out_dir(project.out_dir()).no_cache(true).build();
    let output = session.compile().unwrap();
    assert_eq!(output.exit_code(), 0);
    let design = output.design.unwrap();
    let g = session.symbols.get("g").unwrap();
    let array = design
        .serializer
        .ids()
        .find(|&id| {
            let object = design.serializer.get(id);
            object.kind == UhdmKind::GenScopeArray && object.name == g
        })
        .expect("gen scope array");
    assert_eq!(design.serializer.get(array).owned(Collection::Scopes).len(), 3);
}

#[test]
fn second_run_hits_the_caches_and_agrees() {
    let project = Project::new();
    let top = project.add(
        "top.sv",
        "`define W 4\nmodule top;\n  wire [`W-1:0] bus;\n  assign bus = '0;\nendmodule\n",
    );
    let session = Session::builder().source(&top).out_dir(project.out_dir()).build();
    let first = session.compile().unwrap();
    assert_eq!(first.exit_code(), 0);
    // cache entries were produced
    let cache_dir = project.out_dir().join("cache");
    let entries = std::fs::read_dir(&cache_dir).unwrap().count();
    assert!(entries >= 2, "expected pp and ast entries, found {entries}");

    let second = session.compile().unwrap();
    assert_eq!(second.exit_code(), 0);
    let a = first.design.unwrap();
    let b = second.design.unwrap();
    // separate serializers, structurally equivalent graphs
    assert!(a.serializer.structurally_equal(a.root, &b.serializer, b.root));
}

#[test]
fn empty_file_parses_to_empty_design_without_error() {
    let project = Project::new();
    let top = project.add("empty.sv", "\n");
    let session = Session::builder()
        .source(&top)
        .out_dir(project.out_dir())
        .no_cache(true)
        .parse_only(true)
        .build();
    let output = session.compile().unwrap();
    assert!(output.errors.is_empty(), "{:?}", output.errors);
    assert_eq!(output.exit_code(), 0);
}

#[test]
fn missing_top_module_is_fatal_exit() {
    let project = Project::new();
    let top = project.add("pkg.sv", "package p;\n  parameter W = 1;\nendpackage\n");
    let session =
        Session::builder().source(&top).out_dir(project.out_dir()).no_cache(true).build();
    let output = session.compile().unwrap();
    assert!(output.errors.contains(ErrorKind::ElabNoTopLevelModule));
    assert_ne!(output.exit_code(), 0);
}

#[test]
fn multiple_files_share_the_compilation_unit() {
    let project = Project::new();
    let defines = project.add("defines.sv", "`define WIDTH 8\n");
    let top = project.add(
        "top.sv",
        "module top;\n  wire [`WIDTH-1:0] bus;\n  assign bus = '0;\nendmodule\n",
    );
    let session = Session::builder()
        .sources([&defines, &top])
        .out_dir(project.out_dir())
        .no_cache(true)
        .build();
    let output = session.compile().unwrap();
    assert!(!output.errors.contains(ErrorKind::PpUnknownMacro), "{:?}", output.errors);
    assert_eq!(output.exit_code(), 0);
}

#[test]
fn file_unit_mode_isolates_macros() {
    let project = Project::new();
    let defines = project.add("defines.sv", "`define ONLY_HERE 1\nmodule helper; endmodule\n");
    let user = project.add(
        "user.sv",
        "module user_top;\n`ifdef ONLY_HERE\n  wire seen;\n`endif\nendmodule\n",
    );
    let session = Session::builder()
        .sources([&defines, &user])
        .out_dir(project.out_dir())
        .no_cache(true)
        .file_unit(true)
        .build();
    let output = session.compile().unwrap();
    let design = output.design.unwrap();
    // the macro from the first unit is invisible in the second
    let seen = session.symbols.get("seen");
    let leaked = seen.is_some_and(|name| {
        design.serializer.ids().any(|id| design.serializer.get(id).name == name)
    });
    assert!(!leaked, "macros must not leak across file units");
}
