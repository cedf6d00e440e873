//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` states together with the
//! binaries they reference, so `$PATH` lookups resolve.

use super::filesystem::MockFs;

/// Search path used by the scenarios.
pub const SCENARIO_PATH: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin"];

impl MockFs {
    /// Creates a typical system with a few processes.
    ///
    /// Includes: init (PID 1) with no arguments, an interactive shell, a python
    /// service started through the interpreter, a kernel thread with an empty
    /// command line, and non-process entries such as `/proc/self`.
    pub fn typical_system() -> Self {
        let mut fs = Self::new();

        fs.add_file("/usr/lib/systemd/systemd", "ELF");
        fs.add_file("/usr/bin/bash", "ELF");
        fs.add_file("/usr/bin/python", "ELF");
        fs.add_file("/usr/bin/vim", "ELF");
        fs.add_file("/usr/lib/libc.so.6", "ELF");
        fs.add_file("/opt/app/run.py", "#!/usr/bin/python");

        fs.add_process(1, &["/usr/lib/systemd/systemd"], &["/usr/lib/libc.so.6"]);
        fs.add_process(
            1000,
            &["bash", "--login"],
            &["/usr/bin/bash", "/usr/lib/libc.so.6", "/usr/lib/libc.so.6"],
        );
        fs.add_process(
            1001,
            &["/usr/bin/python", "/opt/app/run.py", "--flag"],
            &["/usr/bin/python", "/usr/lib/libc.so.6", "/memfd:python (deleted)"],
        );
        fs.add_process(1002, &["vim", "/home/user/notes.txt"], &["/usr/bin/vim"]);

        // Kernel thread: empty cmdline, no mappings
        fs.add_process(2, &[], &[]);

        fs.add_dir("/proc/self");
        fs.add_dir("/proc/sys");
        fs.add_file("/proc/uptime", "12345.67 98765.43\n");

        fs
    }

    /// Creates a system where one process has exited between listing
    /// `/proc` and reading its files, and another hides its mappings.
    pub fn with_vanishing_processes() -> Self {
        let mut fs = Self::typical_system();

        // Directory is listed but cmdline is gone
        fs.add_dir("/proc/3000");

        // cmdline readable, map_files not accessible
        fs.add_file("/proc/3001/cmdline", "/usr/bin/bash\0-c\0true\0");

        fs
    }
}
